use pc_core::PipelineConfig;
use pc_core::clock::DeltaGuard;

use crate::smoothing::alpha_for;

/// Plancher d'écart-type pour la division du z-score.
const STDDEV_EPSILON: f32 = 1e-3;

/// Variance minimale au démarrage à froid.
const INITIAL_VARIANCE_FLOOR: f32 = 1e-2;

/// Seuil au-delà duquel un delta est jugé aberrant (secondes).
const MAX_NORMALIZER_DT: f32 = 1.0;

/// Moyenne et variance EWMA de la nouveauté brute.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunningStats {
    /// Moyenne glissante.
    pub mean: f32,
    /// Variance glissante.
    pub variance: f32,
    /// `false` jusqu'au premier échantillon.
    pub initialized: bool,
}

impl RunningStats {
    /// Écart-type courant.
    #[must_use]
    pub fn stddev(&self) -> f32 {
        self.variance.max(0.0).sqrt()
    }
}

/// Normalisation z-score adaptative de la nouveauté brute.
///
/// Les dérives lentes de gain ou de ligne de base sont absorbées par les
/// statistiques glissantes au lieu d'être lues comme des onsets.
///
/// # Example
/// ```
/// use pc_core::PipelineConfig;
/// use pc_tempo::normalizer::NoveltyNormalizer;
/// let mut n = NoveltyNormalizer::new(&PipelineConfig::default());
/// let z = n.update(0.0, 0.016);
/// assert_eq!(z, 0.0);
/// ```
#[derive(Clone, Debug)]
pub struct NoveltyNormalizer {
    stats: RunningStats,
    mean_tau: f32,
    variance_tau: f32,
    clip: f32,
    guard: DeltaGuard,
    last_z: f32,
}

impl NoveltyNormalizer {
    /// Crée un normaliseur à partir de la configuration.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            stats: RunningStats::default(),
            mean_tau: config.mean_tau_secs,
            variance_tau: config.variance_tau_secs,
            clip: config.z_clip,
            guard: DeltaGuard::new(config.hop_period(), MAX_NORMALIZER_DT),
            last_z: 0.0,
        }
    }

    /// Met à jour les statistiques et retourne le z-score borné de `raw`.
    ///
    /// Le premier appel initialise la moyenne sur `raw` et la variance sur une
    /// valeur non nulle, pour éviter un seuil nul au démarrage.
    pub fn update(&mut self, raw: f32, dt: f32) -> f32 {
        let raw = if raw.is_finite() { raw } else { self.stats.mean };
        let dt = self.guard.replace(dt);

        if !self.stats.initialized {
            self.stats = RunningStats {
                mean: raw,
                variance: (0.25 * raw * raw).max(INITIAL_VARIANCE_FLOOR),
                initialized: true,
            };
        } else {
            let a_mean = alpha_for(dt, self.mean_tau);
            let a_var = alpha_for(dt, self.variance_tau);
            self.stats.mean += a_mean * (raw - self.stats.mean);
            let dev = raw - self.stats.mean;
            self.stats.variance += a_var * (dev * dev - self.stats.variance);
        }

        let z = (raw - self.stats.mean) / self.stats.stddev().max(STDDEV_EPSILON);
        self.last_z = z.clamp(-self.clip, self.clip);
        self.last_z
    }

    /// Statistiques courantes.
    #[must_use]
    pub fn stats(&self) -> RunningStats {
        self.stats
    }

    /// Dernier z-score produit.
    #[must_use]
    pub fn last_z(&self) -> f32 {
        self.last_z
    }

    /// Retour à l'état de démarrage à froid.
    pub fn reset(&mut self) {
        self.stats = RunningStats::default();
        self.last_z = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> NoveltyNormalizer {
        NoveltyNormalizer::new(&PipelineConfig::default())
    }

    #[test]
    fn cold_start_variance_is_not_zero() {
        let mut n = normalizer();
        let _ = n.update(0.0, 0.016);
        assert!(n.stats().variance > 0.0);
        let z = n.update(1.0, 0.016);
        assert!(z > 0.0 && z <= 6.0);
    }

    #[test]
    fn z_is_clipped() {
        let mut n = normalizer();
        for _ in 0..500 {
            let _ = n.update(0.001, 0.016);
        }
        let z = n.update(1000.0, 0.016);
        assert!((z - 6.0).abs() < 1e-6);
    }

    #[test]
    fn slow_drift_is_absorbed() {
        let mut n = normalizer();
        let mut last = 0.0;
        // Ligne de base qui monte lentement de 1.0 à 3.0 sur 60 s
        for i in 0..3750 {
            let raw = 1.0 + 2.0 * i as f32 / 3750.0;
            last = n.update(raw, 0.016);
        }
        assert!(last.abs() < 2.0, "drift read as onset: z = {last}");
    }

    #[test]
    fn bad_dt_uses_default() {
        let mut a = normalizer();
        let mut b = normalizer();
        let _ = a.update(0.5, 0.016);
        let _ = b.update(0.5, 0.016);
        let za = a.update(1.0, 0.016);
        let zb = b.update(1.0, -3.0);
        let zc = normalizer().update(1.0, 1e9);
        assert!((za - zb).abs() < 1e-3);
        assert!(zc.is_finite());
    }

    #[test]
    fn non_finite_input_is_ignored() {
        let mut n = normalizer();
        let _ = n.update(0.2, 0.016);
        let z = n.update(f32::NAN, 0.016);
        assert!(z.is_finite());
    }

    #[test]
    fn reset_returns_to_cold_start() {
        let mut n = normalizer();
        for _ in 0..100 {
            let _ = n.update(5.0, 0.016);
        }
        n.reset();
        assert!(!n.stats().initialized);
        assert_eq!(n.last_z(), 0.0);
    }
}
