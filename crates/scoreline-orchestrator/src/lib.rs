//! Scoreline Orchestrator: the single write gate for event records.

pub mod broadcast;
pub mod orchestrator;
pub mod resolve;

pub use broadcast::{BroadcastSink, ChangeSink, NullSink, RecordChange};
pub use orchestrator::WriteOrchestrator;
pub use resolve::{resolve, Resolution};
