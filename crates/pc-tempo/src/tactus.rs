use pc_core::frame::{LockState, MAX_BINS, ResonatorFrame, TactusFrame};
use pc_core::PipelineConfig;

use crate::smoothing::AttackRelease;

/// Parents harmoniques (ratio de tempo, poids) qui soutiennent un candidat.
///
/// Les multiples sont ce qu'un train au tempo candidat produit lui-même. Les
/// sous-multiples pèsent peu : un train lent produit aussi un pic au double
/// tempo, qui ne doit pas recevoir le même soutien que le fondamental.
const FAMILY: [(f32, f32); 6] = [
    (2.0, 0.5),
    (3.0, 0.25),
    (1.5, 0.2),
    (0.5, 0.1),
    (1.0 / 3.0, 0.05),
    (2.0 / 3.0, 0.05),
];

/// Plafond de confiance : l'accord parfait garde une incertitude résiduelle.
const CONFIDENCE_CEILING: f32 = 0.95;

/// Décroissance de la confiance par cycle de silence.
const SILENCE_DECAY: f32 = 0.85;

/// Tolérance relative autour de chaque membre de la famille pour la masse.
const FAMILY_TOLERANCE: f32 = 0.06;

/// Centre et largeur (octaves) de la préférence perceptive de tactus.
const TACTUS_PRIOR_BPM: f32 = 120.0;
const TACTUS_PRIOR_WIDTH: f32 = 1.0;

/// Part du score que la préférence de tactus peut retirer : elle ne départage
/// que des familles presque à égalité.
const TACTUS_PRIOR_INFLUENCE: f32 = 0.1;

/// Plancher de la médiane du spectre pour le rapport de proéminence.
const MEDIAN_EPSILON: f32 = 1e-6;

/// Résolveur de tactus : un seul tempo dominant, avec hystérésis et vérification.
///
/// Machine d'états UNLOCKED → PENDING → LOCKED. Un challenger doit battre le
/// gagnant d'une marge relative pendant plusieurs cycles consécutifs ; un
/// nouveau gagnant doit survivre à la fenêtre de vérification sans être
/// délogé avant de verrouiller.
///
/// # Example
/// ```
/// use pc_core::PipelineConfig;
/// use pc_core::frame::ResonatorFrame;
/// use pc_tempo::tactus::TactusResolver;
/// let mut resolver = TactusResolver::new(&PipelineConfig::default());
/// let out = resolver.update(&ResonatorFrame::empty(121, 60.0, 1.0));
/// assert!(!out.locked);
/// ```
pub struct TactusResolver {
    state: LockState,
    winner: Option<usize>,
    challenger: Option<usize>,
    challenger_frames: u32,
    confidence: AttackRelease,
    silent_cycles: u32,
    relocking: bool,
    last_bpm: f32,
    last_phase: f32,
    margin: f32,
    hysteresis_frames: u32,
    verify_secs: f64,
    silence_floor: f32,
    silence_release_cycles: u32,
    lock_min_confidence: f32,
    min_prominence: f32,
    last: TactusFrame,
}

impl TactusResolver {
    /// Crée un résolveur déverrouillé.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            state: LockState::Unlocked,
            winner: None,
            challenger: None,
            challenger_frames: 0,
            confidence: AttackRelease::new(0.3, 0.05),
            silent_cycles: 0,
            relocking: false,
            last_bpm: 0.0,
            last_phase: 0.0,
            margin: config.hysteresis_margin,
            hysteresis_frames: config.hysteresis_frames,
            verify_secs: f64::from(config.verify_secs),
            silence_floor: config.silence_floor,
            silence_release_cycles: config.silence_release_cycles,
            lock_min_confidence: config.lock_min_confidence,
            min_prominence: config.min_prominence,
            last: TactusFrame::default(),
        }
    }

    /// Consomme une frame de résonateur et produit l'estimation de tactus.
    pub fn update(&mut self, frame: &ResonatorFrame) -> TactusFrame {
        self.update_with_silence(frame, false)
    }

    /// Comme `update`, avec le verdict du détecteur de silence d'entrée.
    ///
    /// Un cycle sous le plancher de magnitude, sans pic qui se détache du
    /// spectre, ou dont l'entrée est silencieuse, compte comme un cycle de
    /// silence.
    pub fn update_with_silence(
        &mut self,
        frame: &ResonatorFrame,
        input_silent: bool,
    ) -> TactusFrame {
        let t = frame.timestamp;
        let sub_floor = input_silent
            || frame.silent
            || frame.max_magnitude < self.silence_floor
            || prominence(frame) < self.min_prominence;

        let (density, family_score) = if sub_floor {
            self.on_silence(t);
            (0.0, 0.0)
        } else {
            self.silent_cycles = 0;
            self.select_winner(frame, t);
            match self.winner {
                Some(w) => {
                    let density = family_density(frame, frame.bin_bpm(w));
                    let _ = self.confidence.update(density * CONFIDENCE_CEILING);
                    self.last_bpm = frame.refined_bpm(w);
                    self.last_phase = frame.phases[w];
                    (density, family_score(frame, w))
                }
                None => (0.0, 0.0),
            }
        };

        self.verify(t);

        self.last = TactusFrame {
            timestamp: t,
            bpm: self.last_bpm,
            confidence: self.confidence.value().clamp(0.0, CONFIDENCE_CEILING),
            density_conf: density,
            phase_hint: self.last_phase,
            locked: self.state.is_locked(),
            state: self.state,
            winning_bin: self.winner,
            challenger_bin: self.challenger,
            challenger_frames: self.challenger_frames,
            relocking: self.relocking,
            family_score,
        };
        log::trace!(
            "tactus t={t:.2} bpm={:.1} conf={:.3} state={:?}",
            self.last.bpm,
            self.last.confidence,
            self.state
        );
        self.last
    }

    /// Dernière sortie.
    #[must_use]
    pub fn last(&self) -> &TactusFrame {
        &self.last
    }

    /// État courant de la machine de verrouillage.
    #[must_use]
    pub fn state(&self) -> LockState {
        self.state
    }

    /// Retour à l'état initial déverrouillé.
    pub fn reset(&mut self) {
        self.state = LockState::Unlocked;
        self.winner = None;
        self.challenger = None;
        self.challenger_frames = 0;
        self.confidence.reset();
        self.silent_cycles = 0;
        self.relocking = false;
        self.last_bpm = 0.0;
        self.last_phase = 0.0;
        self.last = TactusFrame::default();
    }

    fn on_silence(&mut self, t: f64) {
        self.silent_cycles = self.silent_cycles.saturating_add(1);
        let _ = self.confidence.decay(SILENCE_DECAY);
        self.challenger = None;
        self.challenger_frames = 0;
        if self.silent_cycles >= self.silence_release_cycles && self.state != LockState::Unlocked {
            if self.state.is_locked() {
                log::info!("Verrou relâché après {} cycles de silence", self.silent_cycles);
            }
            self.state = LockState::Unlocked;
            self.relocking = false;
        } else if let LockState::Pending { .. } = self.state {
            // La vérification exige des cycles consécutifs
            self.state = LockState::Pending { since: t };
        }
    }

    /// Meilleur score de famille parmi les candidats et le gagnant courant,
    /// puis hystérésis.
    fn select_winner(&mut self, frame: &ResonatorFrame, t: f64) {
        let mut best: Option<(usize, f32)> = None;
        let pool = frame.candidates().iter().map(|c| c.bin).chain(self.winner);
        for bin in pool {
            if bin >= frame.bin_count {
                continue;
            }
            let score = family_score(frame, bin);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((bin, score));
            }
        }
        let Some((best_bin, best_score)) = best else {
            return;
        };

        let incumbent = match (self.state, self.winner) {
            (LockState::Unlocked, _) | (_, None) => None,
            (_, Some(w)) => Some(w),
        };

        let Some(winner) = incumbent else {
            self.adopt(best_bin, t);
            return;
        };

        if best_bin == winner {
            self.challenger = None;
            self.challenger_frames = 0;
            return;
        }

        let winner_score = family_score(frame, winner);
        if best_score > winner_score * (1.0 + self.margin) {
            if self.challenger == Some(best_bin) {
                self.challenger_frames += 1;
            } else {
                self.challenger = Some(best_bin);
                self.challenger_frames = 1;
            }
            if self.challenger_frames >= self.hysteresis_frames {
                log::debug!(
                    "Challenger {:.1} BPM remplace {:.1} BPM",
                    frame.bin_bpm(best_bin),
                    frame.bin_bpm(winner)
                );
                self.adopt(best_bin, t);
            }
        } else {
            self.challenger = None;
            self.challenger_frames = 0;
        }
    }

    /// Nouveau gagnant : la vérification (re)démarre contre lui.
    fn adopt(&mut self, bin: usize, t: f64) {
        if self.state.is_locked() {
            log::info!("Verrou perdu : nouveau tempo en vérification");
            self.relocking = true;
        } else if self.state == LockState::Unlocked {
            self.relocking = false;
        }
        self.winner = Some(bin);
        self.challenger = None;
        self.challenger_frames = 0;
        self.state = LockState::Pending { since: t };
    }

    fn verify(&mut self, t: f64) {
        if let LockState::Pending { since } = self.state
            && self.silent_cycles == 0
            && t - since >= self.verify_secs
            && self.confidence.value() >= self.lock_min_confidence
        {
            log::info!("Tempo verrouillé à {:.1} BPM", self.last_bpm);
            self.state = LockState::Locked { since: t };
            self.relocking = false;
        }
    }
}

/// Préférence log-gaussienne centrée sur le tactus perceptif, ramenée à
/// `[1 - TACTUS_PRIOR_INFLUENCE, 1]`.
#[inline]
fn tactus_prior(bpm: f32) -> f32 {
    let octaves = (bpm / TACTUS_PRIOR_BPM).log2() / TACTUS_PRIOR_WIDTH;
    1.0 - TACTUS_PRIOR_INFLUENCE * (1.0 - (-0.5 * octaves * octaves).exp())
}

/// Rapport du maximum du spectre à sa médiane. Un bruit sans périodicité
/// donne un spectre sans pic qui se détache.
fn prominence(frame: &ResonatorFrame) -> f32 {
    let spectrum = frame.spectrum();
    let n = spectrum.len();
    if n == 0 {
        return 0.0;
    }
    let mut scratch = [0.0f32; MAX_BINS];
    scratch[..n].copy_from_slice(spectrum);
    let (_, median, _) = scratch[..n].select_nth_unstable_by(n / 2, f32::total_cmp);
    frame.max_magnitude / (*median).max(MEDIAN_EPSILON)
}

/// Magnitude du bin plus le soutien pondéré de ses parents harmoniques.
fn family_score(frame: &ResonatorFrame, bin: usize) -> f32 {
    let bpm = frame.bin_bpm(bin);
    let own = frame.spectrum[bin];
    let support: f32 = FAMILY
        .iter()
        .map(|&(ratio, weight)| weight * frame.magnitude_at_bpm(bpm * ratio))
        .sum();
    (own + support) * tactus_prior(bpm)
}

/// Part de la puissance totale concentrée dans la famille de `bpm`, au-delà
/// de la part qu'un spectre plat lui donnerait déjà.
fn family_density(frame: &ResonatorFrame, bpm: f32) -> f32 {
    let spectrum = frame.spectrum();
    let mut total = 0.0f32;
    let mut family = 0.0f32;
    let mut members = 0usize;
    let min_width = 1.5 * frame.bin_spacing;
    for (i, &m) in spectrum.iter().enumerate() {
        let power = m * m;
        total += power;
        let bin_bpm = frame.bin_bpm(i);
        let member = std::iter::once(1.0)
            .chain(FAMILY.iter().map(|&(r, _)| r))
            .any(|r| {
                let target = bpm * r;
                (bin_bpm - target).abs() <= (target * FAMILY_TOLERANCE).max(min_width)
            });
        if member {
            family += power;
            members += 1;
        }
    }
    if total <= f32::EPSILON || spectrum.is_empty() {
        return 0.0;
    }
    let coverage = members as f32 / spectrum.len() as f32;
    if coverage >= 1.0 {
        return 0.0;
    }
    ((family / total - coverage) / (1.0 - coverage)).clamp(0.0, 1.0)
}
