use pc_core::clock::{DeltaGuard, HopClock};
use pc_core::frame::{BeatEvent, LockTransition, PipelineOutput, TactusFrame};
#[cfg(feature = "diagnostics")]
use pc_core::frame::DiagnosticsSnapshot;
use pc_core::PipelineConfig;

use crate::beat_clock::BeatClock;
use crate::error::TempoError;
use crate::normalizer::NoveltyNormalizer;
use crate::resonator::ResonatorBank;
use crate::silence::SilenceDetector;
use crate::tactus::TactusResolver;

/// Orchestrateur : normalisation → résonateurs → tactus → horloge.
///
/// Possédé explicitement par le contexte producteur. `process_novelty` tourne
/// à cadence de hop, `tick` à cadence consommateur (ou de hop en mode threadé).
///
/// # Example
/// ```
/// use pc_core::PipelineConfig;
/// use pc_tempo::pipeline::Pipeline;
/// let mut pipeline = Pipeline::new(PipelineConfig::default())?;
/// let out = pipeline.hop(0.0, 0.016);
/// assert!(!out.locked);
/// # Ok::<(), pc_tempo::TempoError>(())
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    hop_clock: HopClock,
    normalizer: NoveltyNormalizer,
    resonator: ResonatorBank,
    resolver: TactusResolver,
    silence: SilenceDetector,
    clock: BeatClock,
    epoch: u32,
    was_locked: bool,
    transition: Option<LockTransition>,
    last_output: PipelineOutput,
}

impl Pipeline {
    /// Valide la configuration, la borne et construit tous les étages.
    ///
    /// # Errors
    /// Retourne `TempoError::Config` si la configuration est structurellement invalide.
    pub fn new(mut config: PipelineConfig) -> Result<Self, TempoError> {
        config.validate()?;
        config.clamp_all();
        log::info!(
            "Pipeline : {}–{} BPM, {} bins, hop {:.1} Hz, résonateurs toutes les {} hops",
            config.min_bpm,
            config.max_bpm,
            config.bin_count,
            config.hop_rate_hz,
            config.hops_per_update()
        );
        Ok(Self {
            hop_clock: HopClock::new(DeltaGuard::new(config.hop_period(), config.max_dt_secs)),
            normalizer: NoveltyNormalizer::new(&config),
            resonator: ResonatorBank::new(&config),
            resolver: TactusResolver::new(&config),
            silence: SilenceDetector::new(&config),
            clock: BeatClock::new(&config),
            epoch: 0,
            was_locked: false,
            transition: None,
            last_output: PipelineOutput::default(),
            config,
        })
    }

    /// Ingère un hop de nouveauté brute.
    ///
    /// Retourne la sortie du résolveur quand ce hop a déclenché un cycle de
    /// résonateurs, `None` sinon.
    pub fn process_novelty(&mut self, raw: f32, t: f64) -> Option<TactusFrame> {
        let dt = self.hop_clock.advance(t);
        self.ingest(raw, t, dt)
    }

    /// Avance l'horloge de battement et retourne la sortie publiable.
    pub fn tick(&mut self, t: f64, dt: f32) -> PipelineOutput {
        let state = self.clock.tick(t, dt);
        self.last_output = PipelineOutput {
            timestamp: t,
            phase01: state.phase01,
            beat_tick: state.beat_tick,
            bpm: state.bpm,
            confidence: state.confidence,
            locked: state.locked,
            epoch: self.epoch,
        };
        self.last_output
    }

    /// Mode "un tick par hop" : ingère puis avance l'horloge du même delta.
    pub fn hop(&mut self, raw: f32, t: f64) -> PipelineOutput {
        let dt = self.hop_clock.advance(t);
        let _ = self.ingest(raw, t, dt);
        self.tick(t, dt)
    }

    fn ingest(&mut self, raw: f32, t: f64, dt: f32) -> Option<TactusFrame> {
        self.silence.push(raw);
        let z = self.normalizer.update(raw, dt);
        let frame = self.resonator.update(z, t)?;
        let silence = self.silence.evaluate();
        let mut tactus = self.resolver.update_with_silence(frame, silence.detected);
        if silence.detected {
            tactus.locked = false;
            tactus.relocking = false;
            tactus.confidence *= 1.0 - silence.level;
        }
        self.clock.update_from_tactus(&tactus, t);

        if tactus.locked != self.was_locked {
            let transition = if tactus.locked {
                LockTransition::Acquired
            } else {
                LockTransition::Released
            };
            log::debug!("Transition de verrou à t={t:.2} : {transition:?}");
            self.transition = Some(transition);
            self.was_locked = tactus.locked;
        }
        Some(tactus)
    }

    /// Réinitialise tous les étages : comportement identique à un démarrage à froid.
    ///
    /// L'époque est incrémentée et reportée dans chaque sortie suivante.
    pub fn reset(&mut self) {
        self.hop_clock.reset();
        self.normalizer.reset();
        self.resonator.reset();
        self.resolver.reset();
        self.silence.reset();
        self.clock.reset();
        self.epoch = self.epoch.wrapping_add(1);
        if self.was_locked {
            self.transition = Some(LockTransition::Released);
        }
        self.was_locked = false;
        self.last_output = PipelineOutput {
            epoch: self.epoch,
            ..PipelineOutput::default()
        };
        log::info!("Pipeline réinitialisé (époque {})", self.epoch);
    }

    /// Retire la dernière transition de verrou non consommée.
    pub fn take_lock_transition(&mut self) -> Option<LockTransition> {
        self.transition.take()
    }

    /// Dernière sortie produite par `tick`.
    #[must_use]
    pub fn last_output(&self) -> PipelineOutput {
        self.last_output
    }

    /// Dernière sortie du résolveur.
    #[must_use]
    pub fn tactus(&self) -> &TactusFrame {
        self.resolver.last()
    }

    /// Époque de reset courante.
    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Configuration effective (après bornage).
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Instantané d'introspection : spectre, candidats, statistiques.
    #[cfg(feature = "diagnostics")]
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let frame = self.resonator.frame();
        let stats = self.normalizer.stats();
        DiagnosticsSnapshot {
            timestamp: frame.timestamp,
            spectrum: frame.spectrum,
            bin_count: frame.bin_count,
            min_bpm: frame.min_bpm,
            bin_spacing: frame.bin_spacing,
            candidates: frame.candidates,
            candidate_count: frame.candidate_count,
            novelty_mean: stats.mean,
            novelty_stddev: stats.stddev(),
            last_z: self.normalizer.last_z(),
            silence_level: self.silence.last().level,
            tactus: *self.resolver.last(),
        }
    }
}

/// Événement discret correspondant à une sortie, si elle porte un battement.
#[must_use]
pub fn beat_event(output: &PipelineOutput) -> Option<BeatEvent> {
    output.beat_tick.then_some(BeatEvent {
        timestamp: output.timestamp,
        phase_at_event: output.phase01,
        strength: output.confidence,
    })
}
