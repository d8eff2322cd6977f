/// Fournit le flux de nouveauté au pipeline, un hop à la fois.
///
/// Implémenté par le front-end audio (hors de ce workspace) et par les
/// générateurs synthétiques du binaire de démonstration.
///
/// # Example
/// ```
/// use pc_core::traits::NoveltySource;
///
/// struct Silence { t: f64 }
/// impl NoveltySource for Silence {
///     fn next_hop(&mut self) -> Option<(f32, f64)> {
///         self.t += 0.016;
///         Some((0.0, self.t))
///     }
///     fn hop_rate_hz(&self) -> f32 { 62.5 }
/// }
/// ```
pub trait NoveltySource: Send + 'static {
    /// Retourne la prochaine valeur de nouveauté et son timestamp (secondes).
    ///
    /// Retourne `None` si la source est épuisée.
    /// CONTRAT : ne doit PAS allouer.
    fn next_hop(&mut self) -> Option<(f32, f64)>;

    /// Cadence nominale de la source.
    fn hop_rate_hz(&self) -> f32;
}
