//! Scoreline Core: event record model, error taxonomy, configuration, ops events.

pub mod config;
pub mod error;
pub mod minute;
pub mod ops;
pub mod types;

pub use config::{
    DetectorConfig, GovernorConfig, QueueConfig, ScanConfig, ScorelineConfig, UpstreamConfig,
};
pub use error::{Error, Result};
pub use minute::derive_minute;
pub use ops::{MemorySink, OpsEvent, OpsLevel, OpsSink, SharedOps, TracingSink};
pub use types::*;

/// Current wall-clock time in epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
