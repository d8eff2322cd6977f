use thiserror::Error;

/// Errors originating from the tempo runtime.
///
/// The DSP stages themselves never fail; only thread lifecycle and
/// configuration checks surface here.
#[derive(Error, Debug)]
pub enum TempoError {
    /// Configuration rejected before the pipeline was built.
    #[error("Configuration rejetée : {0}")]
    Config(#[from] pc_core::CoreError),

    /// The producer thread could not be spawned.
    #[error("Impossible de démarrer le thread producteur : {0}")]
    Spawn(#[from] std::io::Error),

    /// The producer thread panicked.
    #[error("Le thread producteur a paniqué")]
    ProducerPanicked,
}
