use std::thread;
use std::time::{Duration, Instant};

use pc_core::frame::{BeatEvent, LockTransition, PipelineOutput};
use pc_tempo::runtime::PipelineSubscriber;
use serde::Serialize;

/// Largeur de la barre de phase en mode texte.
const BAR_WIDTH: usize = 24;

/// Attente maximale du producteur en mode rejeu.
const CATCH_UP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Line<'a> {
    Frame {
        sequence: u64,
        now: f64,
        phase_now: f32,
        output: &'a PipelineOutput,
    },
    Beat {
        event: &'a BeatEvent,
    },
    Lock {
        transition: LockTransition,
    },
    Summary {
        frames: u64,
        beats: u64,
        dropped_events: u64,
        dropped_hops: u64,
        last: &'a PipelineOutput,
    },
}

/// Consommateur d'affichage : interroge la sortie à cadence de rendu.
pub struct Consumer {
    subscriber: PipelineSubscriber,
    json: bool,
    rendered: u64,
    frames: u64,
    beats: u64,
    last: PipelineOutput,
}

impl Consumer {
    /// Crée un consommateur ; `json` choisit le format de sortie.
    #[must_use]
    pub fn new(subscriber: PipelineSubscriber, json: bool) -> Self {
        Self {
            subscriber,
            json,
            rendered: 0,
            frames: 0,
            beats: 0,
            last: PipelineOutput::default(),
        }
    }

    /// Attend que le producteur ait publié une sortie au moins aussi récente que `t`.
    ///
    /// Retourne `false` si le producteur n'a pas rattrapé dans le délai.
    pub fn wait_until(&mut self, t: f64) -> bool {
        let deadline = Instant::now() + CATCH_UP_TIMEOUT;
        loop {
            if self.subscriber.latest().value.timestamp >= t {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!("Le producteur n'a pas atteint t={t:.2} s");
                return false;
            }
            thread::yield_now();
        }
    }

    /// Une frame de rendu à l'instant de flux `now`.
    ///
    /// Les battements et transitions en attente sont toujours vidés ; la ligne
    /// d'état n'est émise que si une nouvelle séquence a été publiée.
    pub fn frame(&mut self, now: f64) {
        let events: Vec<BeatEvent> = self.subscriber.drain_events().collect();
        for event in &events {
            self.beats += 1;
            if self.json {
                emit(&Line::Beat { event });
            } else {
                println!("{:>8.2}s  * beat  (force {:.2})", event.timestamp, event.strength);
            }
        }
        while let Some(transition) = self.subscriber.try_transition() {
            if self.json {
                emit(&Line::Lock { transition });
            } else {
                println!("{now:>8.2}s  {}", transition_label(transition));
            }
        }

        let snap = self.subscriber.latest();
        if snap.sequence == self.rendered {
            return;
        }
        self.rendered = snap.sequence;
        self.frames += 1;
        self.last = snap.value;

        let phase_now = snap.value.phase_at(now);
        if self.json {
            emit(&Line::Frame {
                sequence: snap.sequence,
                now,
                phase_now,
                output: &snap.value,
            });
        } else {
            println!("{}", status_line(&snap.value, now, phase_now));
        }
    }

    /// Résumé de fin de flux.
    pub fn finish(&mut self, dropped_hops: u64) {
        let diagnostics = self.subscriber.diagnostics();
        log::debug!("niveau de silence final {:.2}", diagnostics.silence_level);
        for c in diagnostics.candidates() {
            log::debug!("candidat {:.1} BPM  magnitude {:.3}", c.bpm, c.magnitude);
        }
        let dropped_events = self.subscriber.dropped_events();
        if self.json {
            emit(&Line::Summary {
                frames: self.frames,
                beats: self.beats,
                dropped_events,
                dropped_hops,
                last: &self.last,
            });
        } else {
            println!(
                "{} frames, {} battements, tempo final {:.1} BPM ({}), {} événements perdus, {} hops perdus",
                self.frames,
                self.beats,
                self.last.bpm,
                if self.last.locked { "verrouillé" } else { "non verrouillé" },
                dropped_events,
                dropped_hops
            );
        }
    }
}

fn emit(line: &Line<'_>) {
    match serde_json::to_string(line) {
        Ok(s) => println!("{s}"),
        Err(e) => log::warn!("Sérialisation JSON impossible : {e}"),
    }
}

fn transition_label(transition: LockTransition) -> &'static str {
    match transition {
        LockTransition::Acquired => "== tempo verrouillé ==",
        LockTransition::Released => "== verrou relâché ==",
    }
}

/// Ligne d'état texte : temps, tempo, confiance, verrou, barre de phase.
#[must_use]
pub fn status_line(out: &PipelineOutput, now: f64, phase_now: f32) -> String {
    format!(
        "{now:>8.2}s  {:>6.1} BPM  conf {:.2}  {}  |{}|",
        out.bpm,
        out.confidence,
        if out.locked { "LOCK" } else { "----" },
        phase_bar(phase_now, BAR_WIDTH)
    )
}

/// Barre de phase : `#` jusqu'à la phase, `.` au-delà.
#[must_use]
pub fn phase_bar(phase01: f32, width: usize) -> String {
    let filled = ((phase01.clamp(0.0, 1.0) * width as f32) as usize).min(width);
    let mut bar = "#".repeat(filled);
    bar.push_str(&".".repeat(width - filled));
    bar
}
