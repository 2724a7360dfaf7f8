//! Fire-and-forget change notifications for score, status and minute.

use std::sync::Arc;

use scoreline_core::{EventRecord, EventStatus, Field};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// What changed on one record in one write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordChange {
    pub external_id: String,
    pub fields: Vec<Field>,
    pub status: EventStatus,
    pub score_home: Option<i32>,
    pub score_away: Option<i32>,
    pub display_score_home: Option<i32>,
    pub display_score_away: Option<i32>,
    pub minute: Option<i32>,
    pub source: String,
    pub timestamp: i64,
}

impl RecordChange {
    /// Snapshot of `record` after a write that changed `fields`.
    pub fn from_record(record: &EventRecord, fields: Vec<Field>, source: &str, timestamp: i64) -> Self {
        Self {
            external_id: record.external_id.clone(),
            fields,
            status: record.status,
            score_home: record.score_home,
            score_away: record.score_away,
            display_score_home: record.display_score_home,
            display_score_away: record.display_score_away,
            minute: record.minute,
            source: source.to_string(),
            timestamp,
        }
    }
}

/// Receiver of committed changes. Must not block and cannot fail the write.
pub trait ChangeSink: Send + Sync {
    fn publish(&self, change: RecordChange);
}

/// Fans changes out to any number of in-process subscribers.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<RecordChange>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ChangeSink for BroadcastSink {
    fn publish(&self, change: RecordChange) {
        // No subscribers is not a failure.
        if let Err(e) = self.sender.send(change) {
            trace!("Change for {} had no subscribers", e.0.external_id);
        }
    }
}

/// Discards every change.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ChangeSink for NullSink {
    fn publish(&self, _change: RecordChange) {}
}
