use thiserror::Error;

/// Errors originating from the core module.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid configuration value or structure.
    #[error("Configuration invalide : {0}")]
    Config(String),

    /// Referenced file does not exist.
    #[error("Fichier introuvable : {path}")]
    FileNotFound {
        /// Path that was not found.
        path: String,
    },

    /// Tempo range cannot hold the requested bins.
    #[error("Plage de tempo invalide : {min_bpm}–{max_bpm} BPM pour {bins} bins")]
    InvalidTempoRange {
        /// Lower bound in BPM.
        min_bpm: f32,
        /// Upper bound in BPM.
        max_bpm: f32,
        /// Requested bin count.
        bins: usize,
    },
}
