use pc_core::PipelineConfig;

use crate::resonator::NoveltyHistory;

/// Verdict du détecteur de silence.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Silence {
    /// L'entrée est jugée silencieuse.
    pub detected: bool,
    /// Profondeur du silence [0, 1]. 0 hors silence.
    pub level: f32,
}

/// Détecteur de silence sur la nouveauté brute, avant normalisation.
///
/// Mesure le contraste entre le minimum et le maximum de la fenêtre après
/// compression racine. La référence de compression est bornée par
/// `level_floor` : une entrée plate ou très faible n'a pas de contraste,
/// quel que soit le gain que lui appliquerait le z-score.
///
/// # Example
/// ```
/// use pc_core::PipelineConfig;
/// use pc_tempo::silence::SilenceDetector;
/// let mut detector = SilenceDetector::new(&PipelineConfig::default());
/// for _ in 0..300 { detector.push(0.0); }
/// let silence = detector.evaluate();
/// assert!(silence.detected);
/// assert_eq!(silence.level, 1.0);
/// ```
pub struct SilenceDetector {
    window: NoveltyHistory,
    threshold: f32,
    level_floor: f32,
    last: Silence,
}

impl SilenceDetector {
    /// Crée le détecteur avec une fenêtre vide.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            window: NoveltyHistory::with_capacity(config.silence_window_len()),
            threshold: config.silence_threshold,
            level_floor: config.silence_level_floor.max(f32::EPSILON),
            last: Silence {
                detected: true,
                level: 1.0,
            },
        }
    }

    /// Ajoute un échantillon de nouveauté brute.
    #[inline]
    pub fn push(&mut self, raw: f32) {
        self.window.push(if raw.is_finite() { raw.max(0.0) } else { 0.0 });
    }

    /// Réévalue le contraste sur la fenêtre courante.
    pub fn evaluate(&mut self) -> Silence {
        let n = self.window.len();
        let mut lo = f32::MAX;
        let mut hi = 0.0f32;
        for i in 0..n {
            let x = self.window.get(i);
            lo = lo.min(x);
            hi = hi.max(x);
        }
        if n == 0 {
            lo = 0.0;
        }

        let reference = hi.max(self.level_floor);
        let compress = |x: f32| (x / reference).clamp(0.0, 1.0).sqrt();
        let quiet = 1.0 - (compress(hi) - compress(lo));

        self.last = if quiet > self.threshold {
            let range = (1.0 - self.threshold).max(1e-3);
            Silence {
                detected: true,
                level: ((quiet - self.threshold) / range).clamp(0.0, 1.0),
            }
        } else {
            Silence::default()
        };
        self.last
    }

    /// Dernier verdict.
    #[must_use]
    pub fn last(&self) -> Silence {
        self.last
    }

    /// Vide la fenêtre.
    pub fn reset(&mut self) {
        self.window.clear();
        self.last = Silence {
            detected: true,
            level: 1.0,
        };
    }
}
