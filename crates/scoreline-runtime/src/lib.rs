//! Scoreline Runtime: reconcile plumbing and the periodic tasks that feed it.
//!
//! Producers (bucket scans, the change-feed poller) push ids into the
//! `ReconcileQueue`; its drain loop hands each id to the `Reconciler`, which
//! fetches fresh state through the governed `LiveFeed` and submits it to the
//! write orchestrator.

pub mod jobs;
pub mod queue;
pub mod reconcile;
pub mod scans;

pub use jobs::{JobStats, PeriodicJob, RunOutcome};
pub use queue::{DrainReport, EnqueueResult, QueueStats, ReconcileQueue};
pub use reconcile::{ReconcileResult, Reconciler};
pub use scans::{live_scan, upcoming_scan, ChangeFeedPoller};
