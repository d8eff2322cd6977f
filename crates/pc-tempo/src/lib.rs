// Suivi de tempo et de phase de battement en temps réel pour pulsecore.
//
// Nouveauté brute → z-score → banc de résonateurs Goertzel → résolveur de
// tactus → horloge PLL, puis publication sans verrou vers le consommateur.

pub mod beat_clock;
pub mod channel;
pub mod error;
pub mod events;
pub mod normalizer;
pub mod pipeline;
pub mod resonator;
pub mod runtime;
pub mod silence;
pub mod smoothing;
pub mod tactus;

pub use beat_clock::{BeatClock, BeatClockState};
pub use channel::{Publisher, Snapshot, Subscriber, latest_channel};
pub use error::TempoError;
pub use events::{BeatEventReceiver, BeatEventSender, beat_event_queue};
pub use normalizer::NoveltyNormalizer;
pub use pipeline::Pipeline;
pub use resonator::ResonatorBank;
pub use silence::{Silence, SilenceDetector};
pub use runtime::{
    NoveltyFeed, PipelineCommand, PipelineControl, PipelineSubscriber, PipelineThread,
    spawn_pipeline_thread,
};
pub use tactus::TactusResolver;
