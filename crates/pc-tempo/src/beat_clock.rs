use std::f32::consts::{PI, TAU};

use pc_core::clock::DeltaGuard;
use pc_core::frame::TactusFrame;
use pc_core::PipelineConfig;

/// Tempo de départ avant toute mise à jour du résolveur.
const DEFAULT_BPM: f32 = 120.0;

/// État instantané de l'horloge, retourné par `tick`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BeatClockState {
    /// Timestamp du tick (secondes).
    pub timestamp: f64,
    /// Phase de battement [0, 1).
    pub phase01: f32,
    /// Vrai sur le tick qui termine un tour de phase.
    pub beat_tick: bool,
    /// Tempo courant, corrections PLL incluses.
    pub bpm: f32,
    /// Confiance relayée du résolveur.
    pub confidence: f32,
    /// Verrou relayé du résolveur.
    pub locked: bool,
}

/// Intégrateur de phase continu façon PLL.
///
/// `tick` avance la phase à chaque frame consommateur ; `update_from_tactus`
/// corrige phase et fréquence quand le résolveur publie. L'horloge ne calcule
/// ni verrou ni confiance : elle relaie ceux du résolveur.
///
/// # Example
/// ```
/// use pc_core::PipelineConfig;
/// use pc_tempo::beat_clock::BeatClock;
/// let mut clock = BeatClock::new(&PipelineConfig::default());
/// let state = clock.tick(0.016, 0.016);
/// assert!(state.phase01 >= 0.0 && state.phase01 < 1.0);
/// assert!(!state.beat_tick);
/// ```
pub struct BeatClock {
    /// Accumulateur de phase, radians [0, 2π).
    phase: f32,
    bpm: f32,
    /// Correction de fréquence intégrée (BPM).
    freq_integral: f32,
    synced: bool,
    locked: bool,
    /// Verrouillé ou en re-vérification après un verrou.
    ticking: bool,
    confidence: f32,
    /// Temps intégré (somme des dt bornés), base du debounce.
    elapsed: f64,
    last_beat: Option<f64>,
    /// Une correction a fait franchir 2π : le prochain tick compte comme un tour.
    wrap_pending: bool,
    last_t: Option<f64>,
    min_bpm: f32,
    max_bpm: f32,
    phase_gain: f32,
    freq_gain: f32,
    max_phase_step: f32,
    max_freq_correction: f32,
    snap_threshold: f32,
    debounce_ratio: f32,
    guard: DeltaGuard,
}

impl BeatClock {
    /// Crée une horloge non synchronisée au tempo par défaut.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            phase: 0.0,
            bpm: DEFAULT_BPM.clamp(config.min_bpm, config.max_bpm),
            freq_integral: 0.0,
            synced: false,
            locked: false,
            ticking: false,
            confidence: 0.0,
            elapsed: 0.0,
            last_beat: None,
            wrap_pending: false,
            last_t: None,
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
            phase_gain: config.pll_phase_gain,
            freq_gain: config.pll_freq_gain,
            max_phase_step: config.max_phase_step,
            max_freq_correction: config.max_freq_correction_bpm,
            snap_threshold: config.snap_threshold_bpm,
            debounce_ratio: config.debounce_ratio,
            guard: DeltaGuard::new(config.hop_period(), config.max_dt_secs),
        }
    }

    /// Corrige l'horloge à partir d'une nouvelle sortie du résolveur.
    ///
    /// Écart de tempo au-delà du seuil (ou première synchronisation) : recalage
    /// direct de la phase et du tempo. Sinon : correction proportionnelle bornée
    /// de la phase vers `phase_hint` et correction intégrale bornée de la fréquence.
    pub fn update_from_tactus(&mut self, frame: &TactusFrame, t: f64) {
        self.locked = frame.locked;
        self.ticking = frame.locked || frame.relocking;
        self.confidence = frame.confidence.clamp(0.0, 1.0);
        if !frame.bpm.is_finite() || frame.bpm <= 0.0 || !frame.phase_hint.is_finite() {
            return;
        }
        let target = frame.bpm.clamp(self.min_bpm, self.max_bpm);

        // `phase_hint` vaut à l'instant `t` ; l'horloge est à `last_t`.
        let lead = match self.last_t {
            Some(last) if t.is_finite() => {
                ((last - t) as f32).clamp(-self.guard.max(), self.guard.max())
            }
            _ => 0.0,
        };

        if !self.synced || (target - self.bpm).abs() > self.snap_threshold {
            log::debug!("Recalage de l'horloge : {:.1} → {:.1} BPM", self.bpm, target);
            self.bpm = target;
            self.freq_integral = 0.0;
            self.phase = wrap_tau(frame.phase_hint + TAU * target / 60.0 * lead);
            self.wrap_pending = false;
            self.synced = true;
            return;
        }

        let predicted = frame.phase_hint + TAU * self.bpm / 60.0 * lead;
        let error = wrap_pi(predicted - self.phase);

        let step = (self.phase_gain * error).clamp(-self.max_phase_step, self.max_phase_step);
        let corrected = self.phase + step;
        if corrected >= TAU {
            self.wrap_pending = true;
        }
        self.phase = wrap_tau(corrected);

        self.freq_integral = (self.freq_integral + self.freq_gain * error)
            .clamp(-self.max_freq_correction, self.max_freq_correction);
        self.bpm = (target + self.freq_integral).clamp(self.min_bpm, self.max_bpm);
    }

    /// Avance la phase de `2π · (bpm / 60) · dt`.
    ///
    /// Émet `beat_tick` sur un tour de phase, sauf si un battement a déjà été
    /// émis dans la fraction de période de debounce, ou si le résolveur n'est
    /// ni verrouillé ni en train de re-vérifier un nouveau gagnant.
    pub fn tick(&mut self, t: f64, dt: f32) -> BeatClockState {
        let dt = self.guard.clamp(dt);
        if t.is_finite() {
            self.last_t = Some(t);
        }
        self.elapsed += f64::from(dt);

        let mut phase = self.phase + TAU * self.bpm / 60.0 * dt;
        let mut wrapped = std::mem::take(&mut self.wrap_pending);
        if phase >= TAU {
            phase -= TAU;
            wrapped = true;
        }
        self.phase = wrap_tau(phase);

        let period = f64::from(60.0 / self.bpm);
        let too_soon = self
            .last_beat
            .is_some_and(|b| self.elapsed - b < f64::from(self.debounce_ratio) * period);
        let beat_tick = wrapped && self.ticking && !too_soon;
        if beat_tick {
            self.last_beat = Some(self.elapsed);
        }

        BeatClockState {
            timestamp: t,
            phase01: self.phase01(),
            beat_tick,
            bpm: self.bpm,
            confidence: self.confidence,
            locked: self.locked,
        }
    }

    /// Phase courante [0, 1).
    #[must_use]
    pub fn phase01(&self) -> f32 {
        let p = self.phase / TAU;
        if (0.0..1.0).contains(&p) { p } else { 0.0 }
    }

    /// Tempo courant.
    #[must_use]
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Verrou relayé.
    #[must_use]
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Retour à l'état initial non synchronisé.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.bpm = DEFAULT_BPM.clamp(self.min_bpm, self.max_bpm);
        self.freq_integral = 0.0;
        self.synced = false;
        self.locked = false;
        self.ticking = false;
        self.confidence = 0.0;
        self.elapsed = 0.0;
        self.last_beat = None;
        self.wrap_pending = false;
        self.last_t = None;
    }
}

/// Ramène un angle dans [0, 2π).
#[inline(always)]
fn wrap_tau(x: f32) -> f32 {
    if !x.is_finite() {
        return 0.0;
    }
    let w = x.rem_euclid(TAU);
    if w >= TAU { 0.0 } else { w }
}

/// Ramène un angle dans [-π, π).
#[inline(always)]
fn wrap_pi(x: f32) -> f32 {
    wrap_tau(x + PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use pc_core::frame::LockState;

    fn locked_frame(bpm: f32, phase_hint: f32) -> TactusFrame {
        TactusFrame {
            bpm,
            phase_hint,
            confidence: 0.8,
            locked: true,
            state: LockState::Locked { since: 0.0 },
            ..TactusFrame::default()
        }
    }

    #[test]
    fn phase_stays_in_unit_interval() {
        let mut clock = BeatClock::new(&PipelineConfig::default());
        clock.update_from_tactus(&locked_frame(177.0, 6.2), 0.0);
        let dts = [0.016, 1e-7, 0.1, 5.0, -1.0, f32::NAN, 0.033, f32::INFINITY, 0.0999];
        let mut t = 0.0;
        for i in 0..5000 {
            let dt = dts[i % dts.len()];
            t += 0.016;
            let s = clock.tick(t, dt);
            assert!((0.0..1.0).contains(&s.phase01), "phase01 = {}", s.phase01);
        }
    }

    #[test]
    fn one_tick_per_wrap() {
        let mut clock = BeatClock::new(&PipelineConfig::default());
        clock.update_from_tactus(&locked_frame(128.0, 0.3), 0.0);
        let mut prev = clock.phase01();
        let mut wraps = 0;
        let mut ticks = 0;
        for i in 1..=600u32 {
            let s = clock.tick(f64::from(i) / 60.0, 1.0 / 60.0);
            if s.phase01 < prev {
                wraps += 1;
            }
            if s.beat_tick {
                ticks += 1;
                assert!(s.phase01 < prev, "tick without wrap");
            }
            prev = s.phase01;
        }
        // 10 s @ 128 BPM
        assert_eq!(wraps, 21);
        assert_eq!(ticks, wraps);
    }

    #[test]
    fn correction_across_wrap_does_not_double_fire() {
        let config = PipelineConfig {
            pll_phase_gain: 1.0,
            max_phase_step: PI,
            ..PipelineConfig::default()
        };
        let mut clock = BeatClock::new(&config);
        clock.update_from_tactus(&locked_frame(120.0, TAU - 0.05), 0.0);
        let s = clock.tick(0.01, 0.01);
        assert!(s.beat_tick);

        // Correction arrière qui repasse sous 2π
        clock.update_from_tactus(&locked_frame(120.0, TAU - 0.3), 0.01);
        let mut ticks = 0;
        let mut t = 0.01;
        for _ in 0..10 {
            t += 0.01;
            if clock.tick(t, 0.01).beat_tick {
                ticks += 1;
            }
        }
        assert_eq!(ticks, 0);

        // Le tour naturel suivant passe
        for _ in 0..60 {
            t += 0.01;
            if clock.tick(t, 0.01).beat_tick {
                ticks += 1;
            }
        }
        assert_eq!(ticks, 1);
    }

    #[test]
    fn large_tempo_change_snaps() {
        let mut clock = BeatClock::new(&PipelineConfig::default());
        clock.update_from_tactus(&locked_frame(120.0, 0.0), 0.0);
        let _ = clock.tick(0.1, 0.1);
        clock.update_from_tactus(&locked_frame(140.0, 2.0), 0.1);
        assert!((clock.bpm() - 140.0).abs() < 1e-4);
        assert!((clock.phase01() - 2.0 / TAU).abs() < 1e-4);
    }

    #[test]
    fn small_correction_is_bounded() {
        let config = PipelineConfig::default();
        let mut clock = BeatClock::new(&config);
        clock.update_from_tactus(&locked_frame(120.0, 1.0), 0.0);
        let before = clock.phase01() * TAU;
        clock.update_from_tactus(&locked_frame(122.0, 1.0 + PI * 0.9), 0.0);
        let moved = clock.phase01() * TAU - before;
        assert!(moved > 0.0 && moved <= config.max_phase_step + 1e-5);
        assert!((clock.bpm() - 122.0).abs() <= config.max_freq_correction_bpm + 1e-4);
    }

    #[test]
    fn tempo_is_clamped_to_range() {
        let mut clock = BeatClock::new(&PipelineConfig::default());
        clock.update_from_tactus(&locked_frame(250.0, 0.0), 0.0);
        assert!((clock.bpm() - 180.0).abs() < 1e-4);
        clock.update_from_tactus(&locked_frame(10.0, 0.0), 0.0);
        assert!((clock.bpm() - 60.0).abs() < 1e-4);
    }

    #[test]
    fn unlocked_clock_never_ticks() {
        let mut clock = BeatClock::new(&PipelineConfig::default());
        let ticks = (1..=1200u32)
            .filter(|&i| clock.tick(f64::from(i) / 60.0, 1.0 / 60.0).beat_tick)
            .count();
        assert_eq!(ticks, 0);
    }

    #[test]
    fn reverification_after_lock_keeps_ticking() {
        let mut clock = BeatClock::new(&PipelineConfig::default());
        let relocking = TactusFrame {
            locked: false,
            relocking: true,
            state: LockState::Pending { since: 0.0 },
            ..locked_frame(120.0, 0.0)
        };
        clock.update_from_tactus(&relocking, 0.0);
        let count = |clock: &mut BeatClock, from: u32| {
            (from..from + 600)
                .filter(|&i| clock.tick(f64::from(i) / 60.0, 1.0 / 60.0).beat_tick)
                .count()
        };
        // 10 s à 120 BPM
        let ticks = count(&mut clock, 1);
        assert!((19..=21).contains(&ticks), "{ticks} ticks");

        let pending = TactusFrame {
            relocking: false,
            ..relocking
        };
        clock.update_from_tactus(&pending, 10.0);
        assert_eq!(count(&mut clock, 601), 0);
    }

    #[test]
    fn oversized_dt_is_clamped() {
        let config = PipelineConfig::default();
        let mut clock = BeatClock::new(&config);
        let before = clock.phase01();
        let s = clock.tick(100.0, 100.0);
        let advanced = (s.phase01 - before).rem_euclid(1.0);
        let max = 120.0 / 60.0 * config.max_dt_secs;
        assert!(advanced <= max + 1e-5);
    }
}
