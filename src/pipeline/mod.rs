//! The audit pipeline: phase orchestration, check fan-out, the completion
//! barrier and score synthesis.

pub mod aggregator;
pub mod barrier;
pub mod dispatcher;
pub mod orchestrator;
pub mod summary;

pub use aggregator::ScoreAggregator;
pub use barrier::{BarrierOutcome, CompletionBarrier};
pub use dispatcher::Dispatcher;
pub use orchestrator::{Collaborators, Orchestrator};
pub use summary::ExecutiveSummary;
