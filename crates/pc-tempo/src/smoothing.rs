/// Lissage exponentiel à facteur fixe.
///
/// `next = factor * prev + (1 - factor) * current`.
///
/// # Example
/// ```
/// use pc_tempo::smoothing::ema;
/// assert!((ema(1.0, 0.0, 0.8) - 0.2).abs() < 1e-6);
/// ```
#[inline(always)]
#[must_use]
pub fn ema(current: f32, previous: f32, factor: f32) -> f32 {
    factor * previous + (1.0 - factor) * current
}

/// Coefficient EWMA pour un pas `dt` et une constante de temps `tau`.
///
/// # Example
/// ```
/// use pc_tempo::smoothing::alpha_for;
/// let a = alpha_for(0.016, 4.0);
/// assert!(a > 0.0 && a < 0.01);
/// ```
#[inline(always)]
#[must_use]
pub fn alpha_for(dt: f32, tau: f32) -> f32 {
    if tau <= 0.0 {
        return 1.0;
    }
    1.0 - (-dt / tau).exp()
}

/// Exponential moving average smoothing with attack/release asymmetry.
///
/// Fast attack (responds quickly to increases), slow release (decays slowly).
///
/// # Example
/// ```
/// use pc_tempo::smoothing::AttackRelease;
/// let mut ar = AttackRelease::new(0.5, 0.05);
/// assert!((ar.update(1.0) - 0.5).abs() < 1e-6);
/// assert!((ar.update(0.0) - 0.475).abs() < 1e-6);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct AttackRelease {
    attack: f32,
    release: f32,
    value: f32,
}

impl AttackRelease {
    /// Create a new smoother starting at 0.
    #[must_use]
    pub fn new(attack: f32, release: f32) -> Self {
        Self {
            attack: attack.clamp(0.0, 1.0),
            release: release.clamp(0.0, 1.0),
            value: 0.0,
        }
    }

    /// Smooth with attack/release asymmetry.
    #[inline(always)]
    pub fn update(&mut self, current: f32) -> f32 {
        let alpha = if current > self.value {
            self.attack
        } else {
            self.release
        };
        self.value += alpha * (current - self.value);
        self.value
    }

    /// Multiplie la valeur courante (décroissance explicite).
    #[inline]
    pub fn decay(&mut self, factor: f32) -> f32 {
        self.value *= factor.clamp(0.0, 1.0);
        self.value
    }

    /// Valeur courante.
    #[must_use]
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Remet la valeur à 0.
    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}
