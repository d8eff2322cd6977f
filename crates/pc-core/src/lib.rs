/// Types partagés, configuration et contrats de sortie pour pulsecore.
///
/// This crate contains the value types that cross stage and core boundaries,
/// the configuration surface, and the small time helpers shared by every stage
/// of the tempo pipeline.

pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod traits;

pub use clock::{DeltaGuard, HopClock};
pub use config::PipelineConfig;
pub use error::CoreError;
pub use frame::{
    BeatEvent, Candidate, DiagnosticsSnapshot, LockState, LockTransition, PipelineOutput,
    ResonatorFrame, TactusFrame, MAX_BINS, MAX_CANDIDATES,
};
pub use traits::NoveltySource;
