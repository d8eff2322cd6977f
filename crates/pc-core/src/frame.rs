use serde::Serialize;

/// Nombre maximal de bins de tempo. Les tableaux par bin sont dimensionnés
/// statiquement à cette capacité ; `PipelineConfig::bin_count` en utilise un préfixe.
pub const MAX_BINS: usize = 256;

/// Nombre maximal de candidats classés par frame de résonateur.
pub const MAX_CANDIDATES: usize = 8;

/// Un candidat de tempo classé par le banc de résonateurs.
///
/// # Example
/// ```
/// use pc_core::frame::Candidate;
/// let c = Candidate::default();
/// assert_eq!(c.bpm, 0.0);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Candidate {
    /// Index du bin gagnant.
    pub bin: usize,
    /// Tempo raffiné par interpolation parabolique.
    pub bpm: f32,
    /// Magnitude lissée normalisée par le maximum global [0, 1].
    pub magnitude: f32,
    /// Magnitude lissée brute.
    pub raw_magnitude: f32,
    /// Phase Goertzel du bin, en radians [0, 2π).
    pub phase: f32,
}

/// Snapshot immuable produit par un cycle du banc de résonateurs.
///
/// Contient le top-K des candidats et le spectre complet par bin.
/// Les tableaux sont de capacité fixe ; seuls les `bin_count` premiers bins
/// et les `candidate_count` premiers candidats sont significatifs.
#[derive(Clone, Debug)]
pub struct ResonatorFrame {
    /// Timestamp du hop qui a déclenché le cycle (secondes).
    pub timestamp: f64,
    /// Candidats classés par magnitude décroissante.
    pub candidates: [Candidate; MAX_CANDIDATES],
    /// Nombre de candidats valides.
    pub candidate_count: usize,
    /// Magnitudes lissées par bin.
    pub spectrum: [f32; MAX_BINS],
    /// Phases brutes par bin, radians [0, 2π).
    pub phases: [f32; MAX_BINS],
    /// Nombre de bins actifs.
    pub bin_count: usize,
    /// Tempo du bin 0.
    pub min_bpm: f32,
    /// Écart en BPM entre deux bins consécutifs.
    pub bin_spacing: f32,
    /// Maximum global des magnitudes lissées.
    pub max_magnitude: f32,
    /// `true` si l'historique est insuffisant ou si le maximum est sous epsilon.
    pub silent: bool,
}

impl ResonatorFrame {
    /// Frame vide (démarrage à froid).
    #[must_use]
    pub fn empty(bin_count: usize, min_bpm: f32, bin_spacing: f32) -> Self {
        Self {
            timestamp: 0.0,
            candidates: [Candidate::default(); MAX_CANDIDATES],
            candidate_count: 0,
            spectrum: [0.0; MAX_BINS],
            phases: [0.0; MAX_BINS],
            bin_count: bin_count.min(MAX_BINS),
            min_bpm,
            bin_spacing,
            max_magnitude: 0.0,
            silent: true,
        }
    }

    /// Candidats valides.
    #[must_use]
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates[..self.candidate_count]
    }

    /// Spectre lissé sur les bins actifs.
    #[must_use]
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum[..self.bin_count]
    }

    /// Tempo nominal d'un bin.
    #[inline]
    #[must_use]
    pub fn bin_bpm(&self, bin: usize) -> f32 {
        self.min_bpm + bin as f32 * self.bin_spacing
    }

    /// Magnitude lissée interpolée linéairement à un tempo arbitraire.
    ///
    /// Retourne 0 hors de la plage couverte.
    ///
    /// # Example
    /// ```
    /// use pc_core::frame::ResonatorFrame;
    /// let mut f = ResonatorFrame::empty(3, 100.0, 10.0);
    /// f.spectrum[1] = 1.0;
    /// f.spectrum[2] = 0.5;
    /// assert!((f.magnitude_at_bpm(115.0) - 0.75).abs() < 1e-6);
    /// assert_eq!(f.magnitude_at_bpm(200.0), 0.0);
    /// ```
    #[must_use]
    pub fn magnitude_at_bpm(&self, bpm: f32) -> f32 {
        if self.bin_count == 0 || self.bin_spacing <= 0.0 {
            return 0.0;
        }
        let pos = (bpm - self.min_bpm) / self.bin_spacing;
        let last = (self.bin_count - 1) as f32;
        if !pos.is_finite() || pos < 0.0 || pos > last {
            return 0.0;
        }
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(self.bin_count - 1);
        let frac = pos - lo as f32;
        self.spectrum[lo] * (1.0 - frac) + self.spectrum[hi] * frac
    }

    /// Tempo raffiné au sous-bin par interpolation parabolique sur le bin et
    /// ses deux voisins. Aux bords, retourne le tempo nominal.
    ///
    /// # Example
    /// ```
    /// use pc_core::frame::ResonatorFrame;
    /// let mut f = ResonatorFrame::empty(5, 100.0, 1.0);
    /// f.spectrum[1] = 0.5;
    /// f.spectrum[2] = 1.0;
    /// f.spectrum[3] = 0.5;
    /// assert!((f.refined_bpm(2) - 102.0).abs() < 1e-6);
    /// ```
    #[must_use]
    pub fn refined_bpm(&self, bin: usize) -> f32 {
        let nominal = self.bin_bpm(bin);
        if bin == 0 || bin + 1 >= self.bin_count {
            return nominal;
        }
        let l = self.spectrum[bin - 1];
        let c = self.spectrum[bin];
        let r = self.spectrum[bin + 1];
        let denom = l - 2.0 * c + r;
        if denom.abs() < 1e-12 {
            return nominal;
        }
        let delta = (0.5 * (l - r) / denom).clamp(-0.5, 0.5);
        nominal + delta * self.bin_spacing
    }
}

/// États de la machine de verrouillage du résolveur.
///
/// # Example
/// ```
/// use pc_core::frame::LockState;
/// assert!(!LockState::default().is_locked());
/// assert!(LockState::Locked { since: 1.0 }.is_locked());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub enum LockState {
    /// Aucun tempo retenu.
    #[default]
    Unlocked,
    /// Tempo provisoire en cours de vérification depuis `since`.
    Pending {
        /// Début de la fenêtre de vérification (secondes).
        since: f64,
    },
    /// Tempo vérifié.
    Locked {
        /// Instant du verrouillage (secondes).
        since: f64,
    },
}

impl LockState {
    /// `true` uniquement pour `Locked`.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// Transition de verrouillage observée lors du dernier cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LockTransition {
    /// Passage à `locked = true`.
    Acquired,
    /// Passage à `locked = false`.
    Released,
}

/// Sortie du résolveur de tactus pour un cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TactusFrame {
    /// Timestamp du cycle (secondes).
    pub timestamp: f64,
    /// Tempo retenu, raffiné au sous-bin. 0 si aucun.
    pub bpm: f32,
    /// Confiance lissée [0, 1).
    pub confidence: f32,
    /// Accord de densité instantané : part de la masse dans la famille gagnante,
    /// au-delà de celle d'un spectre plat.
    pub density_conf: f32,
    /// Phase Goertzel brute du gagnant, radians [0, 2π).
    pub phase_hint: f32,
    /// Tempo vérifié.
    pub locked: bool,
    /// État de la machine de verrouillage.
    pub state: LockState,
    /// Bin gagnant courant.
    pub winning_bin: Option<usize>,
    /// Bin challenger courant.
    pub challenger_bin: Option<usize>,
    /// Nombre de cycles consécutifs gagnés par le challenger.
    pub challenger_frames: u32,
    /// Re-vérification d'un nouveau gagnant juste après un verrou : l'horloge
    /// continue de battre pendant la fenêtre de vérification.
    pub relocking: bool,
    /// Score de famille harmonique du gagnant.
    pub family_score: f32,
}

/// Contrat de sortie exporté vers le consommateur.
///
/// Toujours copié, jamais référencé, à travers la frontière de cœur.
///
/// # Example
/// ```
/// use pc_core::frame::PipelineOutput;
/// let out = PipelineOutput::default();
/// assert!(out.phase01 >= 0.0 && out.phase01 < 1.0);
/// assert!(!out.locked);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PipelineOutput {
    /// Timestamp de production (secondes).
    pub timestamp: f64,
    /// Phase de battement [0, 1).
    pub phase01: f32,
    /// Vrai pendant exactement un tick par tour de phase.
    pub beat_tick: bool,
    /// Tempo courant de l'horloge.
    pub bpm: f32,
    /// Confiance [0, 1].
    pub confidence: f32,
    /// Tempo verrouillé.
    pub locked: bool,
    /// Époque de reset ; incrémentée à chaque `reset()` du producteur.
    pub epoch: u32,
}

impl PipelineOutput {
    /// Extrapole la phase à l'instant `t` avec la même arithmétique que
    /// l'horloge de battement. Un `t` antérieur au timestamp retourne la phase publiée.
    ///
    /// # Example
    /// ```
    /// use pc_core::frame::PipelineOutput;
    /// let out = PipelineOutput { timestamp: 1.0, phase01: 0.25, bpm: 120.0, ..Default::default() };
    /// assert!((out.phase_at(1.125) - 0.5).abs() < 1e-5);
    /// assert!((out.phase_at(1.5) - 0.25).abs() < 1e-5);
    /// ```
    #[must_use]
    pub fn phase_at(&self, t: f64) -> f32 {
        let elapsed = (t - self.timestamp).max(0.0);
        if !elapsed.is_finite() {
            return self.phase01;
        }
        let beats = f64::from(self.phase01) + f64::from(self.bpm.max(0.0)) / 60.0 * elapsed;
        let wrapped = beats.rem_euclid(1.0) as f32;
        if wrapped >= 1.0 { 0.0 } else { wrapped }
    }
}

/// Événement de battement discret, transporté par la file bornée.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BeatEvent {
    /// Timestamp du battement (secondes).
    pub timestamp: f64,
    /// Phase au moment de l'événement [0, 1).
    pub phase_at_event: f32,
    /// Force : confiance du résolveur au moment du battement.
    pub strength: f32,
}

/// Surface d'introspection : spectre, candidats, statistiques de nouveauté.
///
/// Diagnostic uniquement. Type `Copy` de taille fixe pour être publié sans
/// allocation.
#[derive(Clone, Copy, Debug)]
pub struct DiagnosticsSnapshot {
    /// Timestamp du dernier cycle de résonateur.
    pub timestamp: f64,
    /// Spectre lissé par bin.
    pub spectrum: [f32; MAX_BINS],
    /// Nombre de bins actifs.
    pub bin_count: usize,
    /// Tempo du bin 0.
    pub min_bpm: f32,
    /// Écart entre bins.
    pub bin_spacing: f32,
    /// Candidats classés.
    pub candidates: [Candidate; MAX_CANDIDATES],
    /// Nombre de candidats valides.
    pub candidate_count: usize,
    /// Moyenne glissante de la nouveauté brute.
    pub novelty_mean: f32,
    /// Écart-type glissant de la nouveauté brute.
    pub novelty_stddev: f32,
    /// Dernier z-score produit.
    pub last_z: f32,
    /// Niveau de silence de l'entrée [0, 1]. 0 = signal actif.
    pub silence_level: f32,
    /// Dernière sortie du résolveur.
    pub tactus: TactusFrame,
}

impl Default for DiagnosticsSnapshot {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            spectrum: [0.0; MAX_BINS],
            bin_count: 0,
            min_bpm: 0.0,
            bin_spacing: 0.0,
            candidates: [Candidate::default(); MAX_CANDIDATES],
            candidate_count: 0,
            novelty_mean: 0.0,
            novelty_stddev: 0.0,
            last_z: 0.0,
            silence_level: 0.0,
            tactus: TactusFrame::default(),
        }
    }
}

impl DiagnosticsSnapshot {
    /// Candidats valides.
    #[must_use]
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates[..self.candidate_count.min(MAX_CANDIDATES)]
    }

    /// Spectre sur les bins actifs.
    #[must_use]
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum[..self.bin_count.min(MAX_BINS)]
    }
}
