//! Scoreline Recovery: find records that stopped advancing and walk them
//! through a bounded escalation ladder.

pub mod detector;
pub mod ladder;

pub use detector::{classify, StalenessDetector};
pub use ladder::{LadderAction, RecoveryLadder, TickReport};
