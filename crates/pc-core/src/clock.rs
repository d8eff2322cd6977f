/// Garde-fou pour les deltas de temps.
///
/// Le front-end audio livre un timestamp monotone à cadence nominale, mais
/// rien ne garantit qu'un hop ne soit pas perdu, dupliqué ou horodaté en
/// arrière. Chaque étage passe son delta par ce garde avant toute intégration.
///
/// # Example
/// ```
/// use pc_core::clock::DeltaGuard;
/// let guard = DeltaGuard::new(0.016, 0.1);
/// assert!((guard.replace(-1.0) - 0.016).abs() < 1e-6);
/// assert!((guard.clamp(5.0) - 0.1).abs() < 1e-6);
/// assert_eq!(guard.clamp(-1.0), 0.0);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct DeltaGuard {
    /// Delta de repli (typiquement une période de hop nominale).
    fallback: f32,
    /// Delta maximal accepté.
    max: f32,
}

impl DeltaGuard {
    /// Crée un garde avec un delta de repli et un plafond.
    ///
    /// `fallback` est lui-même borné à `max`.
    #[must_use]
    pub fn new(fallback: f32, max: f32) -> Self {
        let max = if max.is_finite() && max > 0.0 { max } else { 0.1 };
        let fallback = if fallback.is_finite() && fallback > 0.0 {
            fallback.min(max)
        } else {
            max
        };
        Self { fallback, max }
    }

    /// Remplace un delta non fini, non positif ou trop grand par le repli.
    ///
    /// Utilisé par les moyennes glissantes : un trou dans le flux ne doit pas
    /// être lu comme plusieurs secondes d'historique.
    #[inline]
    #[must_use]
    pub fn replace(&self, dt: f32) -> f32 {
        if dt.is_finite() && dt > 0.0 && dt <= self.max {
            dt
        } else {
            self.fallback
        }
    }

    /// Borne un delta à `[0, max]`. Un delta non fini ou négatif vaut 0.
    ///
    /// Utilisé par les intégrateurs de phase : un temps qui recule n'avance
    /// simplement pas la phase.
    #[inline]
    #[must_use]
    pub fn clamp(&self, dt: f32) -> f32 {
        if !dt.is_finite() || dt <= 0.0 {
            0.0
        } else {
            dt.min(self.max)
        }
    }

    /// Delta de repli.
    #[must_use]
    pub fn fallback(&self) -> f32 {
        self.fallback
    }

    /// Delta maximal.
    #[must_use]
    pub fn max(&self) -> f32 {
        self.max
    }
}

/// Horloge de hop : dérive un delta assaini à partir de timestamps successifs.
///
/// Le premier appel retourne le delta de repli.
///
/// # Example
/// ```
/// use pc_core::clock::{DeltaGuard, HopClock};
/// let mut clock = HopClock::new(DeltaGuard::new(0.016, 0.1));
/// assert!((clock.advance(10.0) - 0.016).abs() < 1e-6);
/// assert!((clock.advance(10.02) - 0.02).abs() < 1e-4);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct HopClock {
    guard: DeltaGuard,
    last: Option<f64>,
}

impl HopClock {
    /// Crée une horloge sans timestamp connu.
    #[must_use]
    pub fn new(guard: DeltaGuard) -> Self {
        Self { guard, last: None }
    }

    /// Enregistre `t` et retourne le delta assaini depuis le timestamp précédent.
    ///
    /// Un timestamp qui recule ne remplace pas la référence : le hop suivant
    /// est mesuré depuis le plus récent timestamp valide.
    pub fn advance(&mut self, t: f64) -> f32 {
        let dt = match self.last {
            Some(prev) => (t - prev) as f32,
            None => self.guard.fallback(),
        };
        if t.is_finite() && self.last.is_none_or(|prev| t >= prev) {
            self.last = Some(t);
        }
        self.guard.replace(dt)
    }

    /// Dernier timestamp accepté.
    #[must_use]
    pub fn last(&self) -> Option<f64> {
        self.last
    }

    /// Oublie le dernier timestamp.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_replaces_anomalies() {
        let guard = DeltaGuard::new(0.016, 0.1);
        assert!((guard.replace(0.01) - 0.01).abs() < 1e-7);
        assert!((guard.replace(0.0) - 0.016).abs() < 1e-7);
        assert!((guard.replace(f32::NAN) - 0.016).abs() < 1e-7);
        assert!((guard.replace(3.0) - 0.016).abs() < 1e-7);
    }

    #[test]
    fn guard_clamps_for_integration() {
        let guard = DeltaGuard::new(0.016, 0.1);
        assert_eq!(guard.clamp(f32::INFINITY), 0.0);
        assert_eq!(guard.clamp(-0.5), 0.0);
        assert!((guard.clamp(0.25) - 0.1).abs() < 1e-7);
    }

    #[test]
    fn guard_fallback_never_exceeds_max() {
        let guard = DeltaGuard::new(1.0, 0.1);
        assert!((guard.fallback() - 0.1).abs() < 1e-7);
    }

    #[test]
    fn hop_clock_ignores_backwards_time() {
        let mut clock = HopClock::new(DeltaGuard::new(0.016, 0.1));
        let _ = clock.advance(1.0);
        let dt = clock.advance(0.5);
        assert!((dt - 0.016).abs() < 1e-7);
        assert_eq!(clock.last(), Some(1.0));
        let dt = clock.advance(1.02);
        assert!((dt - 0.02).abs() < 1e-4);
    }
}
