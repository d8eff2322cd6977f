use std::thread;
use std::time::Duration;

use pc_core::frame::{BeatEvent, LockTransition, PipelineOutput};
#[cfg(feature = "diagnostics")]
use pc_core::frame::DiagnosticsSnapshot;
use pc_core::PipelineConfig;
use rtrb::RingBuffer;
#[cfg(feature = "diagnostics")]
use triple_buffer::TripleBuffer;

use crate::channel::{Publisher, Snapshot, Subscriber, latest_channel};
use crate::error::TempoError;
use crate::events::{BeatEventReceiver, BeatEventSender, beat_event_queue};
use crate::pipeline::{Pipeline, beat_event};

/// Commandes de contrôle du thread producteur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Réinitialise tous les étages (démarrage à froid).
    Reset,
    /// Termine le thread.
    Quit,
}

/// Profondeur de la file de nouveauté, en secondes de hops.
const NOVELTY_RING_SECS: f32 = 2.0;

/// Attente quand la file de nouveauté est vide.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Côté front-end audio : pousse un hop de nouveauté sans bloquer.
pub struct NoveltyFeed {
    producer: rtrb::Producer<(f32, f64)>,
    dropped: u64,
}

impl NoveltyFeed {
    /// Pousse `(raw, t)`. Retourne `false` si la file est pleine (hop perdu).
    #[inline]
    pub fn push(&mut self, raw: f32, t: f64) -> bool {
        if self.producer.push((raw, t)).is_ok() {
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Places libres dans la file.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.producer.slots()
    }

    /// Hops perdus depuis la création.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Côté consommateur : lit la dernière sortie, les battements et le diagnostic.
pub struct PipelineSubscriber {
    outputs: Subscriber<PipelineOutput>,
    events: BeatEventReceiver,
    transitions: flume::Receiver<LockTransition>,
    #[cfg(feature = "diagnostics")]
    diagnostics: triple_buffer::Output<DiagnosticsSnapshot>,
}

impl PipelineSubscriber {
    /// Dernière sortie publiée et sa séquence. Ne bloque jamais.
    pub fn latest(&mut self) -> Snapshot<PipelineOutput> {
        self.outputs.latest()
    }

    /// `true` si une sortie plus récente que la dernière lue est disponible.
    #[must_use]
    pub fn has_update(&self) -> bool {
        self.outputs.has_update()
    }

    /// Vide les battements en attente.
    pub fn drain_events(&mut self) -> impl Iterator<Item = BeatEvent> + '_ {
        self.events.drain()
    }

    /// Battements perdus sur file pleine.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Prochaine transition de verrou non lue.
    pub fn try_transition(&self) -> Option<LockTransition> {
        self.transitions.try_recv().ok()
    }

    /// Dernier instantané d'introspection publié.
    #[cfg(feature = "diagnostics")]
    pub fn diagnostics(&mut self) -> DiagnosticsSnapshot {
        *self.diagnostics.read()
    }
}

/// Contrôle du thread producteur.
pub struct PipelineControl {
    commands: flume::Sender<PipelineCommand>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PipelineControl {
    /// Demande un reset, exécuté dans le contexte producteur.
    pub fn reset(&self) {
        let _ = self.commands.send(PipelineCommand::Reset);
    }

    /// `true` si le thread producteur est terminé.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(thread::JoinHandle::is_finished)
    }

    /// Arrête le thread et attend sa fin.
    ///
    /// # Errors
    /// Retourne `TempoError::ProducerPanicked` si le thread a paniqué.
    pub fn shutdown(mut self) -> Result<(), TempoError> {
        let _ = self.commands.send(PipelineCommand::Quit);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| TempoError::ProducerPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for PipelineControl {
    fn drop(&mut self) {
        let _ = self.commands.send(PipelineCommand::Quit);
    }
}

/// Les trois extrémités d'un pipeline threadé.
pub struct PipelineThread {
    /// Entrée de nouveauté (contexte audio).
    pub feed: NoveltyFeed,
    /// Sorties (contexte consommateur).
    pub subscriber: PipelineSubscriber,
    /// Reset et arrêt.
    pub control: PipelineControl,
}

/// Démarre le pipeline sur un thread producteur nommé.
///
/// Chaque hop reçu passe par `Pipeline::hop` ; la sortie est publiée sur le
/// canal dernière-valeur et chaque battement poussé dans la file bornée.
///
/// # Errors
/// Retourne une erreur si la configuration est invalide ou si le thread ne
/// peut pas être créé.
pub fn spawn_pipeline_thread(config: PipelineConfig) -> Result<PipelineThread, TempoError> {
    let pipeline = Pipeline::new(config)?;
    let ring = (pipeline.config().hop_rate_hz * NOVELTY_RING_SECS).ceil().max(64.0) as usize;

    let (novelty_tx, novelty_rx) = RingBuffer::new(ring);
    let (out_tx, out_rx) = latest_channel();
    let (event_tx, event_rx) = beat_event_queue(pipeline.config().event_queue_capacity);
    let (cmd_tx, cmd_rx) = flume::bounded(10);
    let (transition_tx, transition_rx) = flume::bounded(16);
    #[cfg(feature = "diagnostics")]
    let (diag_tx, diag_rx) = TripleBuffer::new(&DiagnosticsSnapshot::default()).split();

    let mut producer = Producer {
        pipeline,
        novelty: novelty_rx,
        outputs: out_tx,
        events: event_tx,
        commands: cmd_rx,
        transitions: transition_tx,
        #[cfg(feature = "diagnostics")]
        diagnostics: diag_tx,
        last_cycle: None,
    };

    let handle = thread::Builder::new()
        .name("pc-tempo".to_string())
        .spawn(move || producer.run())?;

    Ok(PipelineThread {
        feed: NoveltyFeed {
            producer: novelty_tx,
            dropped: 0,
        },
        subscriber: PipelineSubscriber {
            outputs: out_rx,
            events: event_rx,
            transitions: transition_rx,
            #[cfg(feature = "diagnostics")]
            diagnostics: diag_rx,
        },
        control: PipelineControl {
            commands: cmd_tx,
            handle: Some(handle),
        },
    })
}

/// État du contexte producteur.
struct Producer {
    pipeline: Pipeline,
    novelty: rtrb::Consumer<(f32, f64)>,
    outputs: Publisher<PipelineOutput>,
    events: BeatEventSender,
    commands: flume::Receiver<PipelineCommand>,
    transitions: flume::Sender<LockTransition>,
    #[cfg(feature = "diagnostics")]
    diagnostics: triple_buffer::Input<DiagnosticsSnapshot>,
    /// Timestamp du dernier cycle du résolveur vu.
    last_cycle: Option<f64>,
}

impl Producer {
    fn run(&mut self) {
        log::info!("Thread producteur démarré");
        loop {
            if !self.handle_commands() {
                break;
            }

            let mut processed = false;
            while let Ok((raw, t)) = self.novelty.pop() {
                self.process(raw, t);
                processed = true;
            }

            if !processed {
                if self.novelty.is_abandoned() && self.novelty.is_empty() {
                    log::info!("Source de nouveauté fermée");
                    break;
                }
                thread::sleep(IDLE_SLEEP);
            }
        }
        let dropped = self.events.dropped();
        if dropped > 0 {
            log::warn!("{dropped} battements perdus (file pleine)");
        }
        log::info!("Thread producteur arrêté");
    }

    /// Retourne `false` sur `Quit` ou si le contrôle a disparu.
    fn handle_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(PipelineCommand::Reset) => {
                    self.pipeline.reset();
                    self.last_cycle = None;
                    self.forward_transition();
                    let _ = self.outputs.publish(&self.pipeline.last_output());
                }
                Ok(PipelineCommand::Quit) | Err(flume::TryRecvError::Disconnected) => return false,
                Err(flume::TryRecvError::Empty) => return true,
            }
        }
    }

    fn process(&mut self, raw: f32, t: f64) {
        let out = self.pipeline.hop(raw, t);
        let _ = self.outputs.publish(&out);
        if let Some(event) = beat_event(&out) {
            let _ = self.events.push(event);
        }
        self.forward_transition();

        let cycle = self.pipeline.tactus().timestamp;
        if self.last_cycle != Some(cycle) {
            self.last_cycle = Some(cycle);
            #[cfg(feature = "diagnostics")]
            self.diagnostics.write(self.pipeline.diagnostics());
        }
    }

    fn forward_transition(&mut self) {
        if let Some(transition) = self.pipeline.take_lock_transition() {
            let _ = self.transitions.try_send(transition);
        }
    }
}
