//! The write orchestrator: the only mutator of an event record's live fields.
//!
//! Every call follows the same shape: validate, take the storage-backed record
//! lock once without waiting, load the record with its shadow metadata,
//! refuse terminal records, resolve the batch, persist it atomically, release,
//! then publish the change. Outcomes are always values; nothing here returns
//! an error to the caller.

use std::sync::Arc;

use scoreline_core::{
    is_valid_external_id, now_secs, priority, EventStatus, Field, FieldUpdate, FieldValue,
    FieldVersion, OpsEvent, OpsLevel, OutcomeStatus, SharedOps, UpdateOutcome,
};
use scoreline_store::{RecordLock, RecordPatch, SqliteStore, VersionedRecord};
use tracing::{debug, info, warn};

use crate::broadcast::{ChangeSink, RecordChange};
use crate::resolve::resolve;

const COMPONENT: &str = "orchestrator";

/// Source tag written on forced terminations.
pub const FORCE_SOURCE: &str = "recovery_force";

pub struct WriteOrchestrator {
    store: Arc<SqliteStore>,
    changes: Arc<dyn ChangeSink>,
    ops: SharedOps,
    lock_ttl_secs: i64,
}

/// Lock held and record loaded; or the outcome to return instead.
enum Gate<'a> {
    Open(RecordLock<'a>, VersionedRecord),
    Closed(UpdateOutcome),
}

impl WriteOrchestrator {
    pub fn new(
        store: Arc<SqliteStore>,
        changes: Arc<dyn ChangeSink>,
        ops: SharedOps,
        lock_ttl_secs: i64,
    ) -> Self {
        info!("WriteOrchestrator initialized: lock_ttl={}s", lock_ttl_secs);
        Self {
            store,
            changes,
            ops,
            lock_ttl_secs,
        }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    // ---------------------------------------------------------------
    // Normal write path
    // ---------------------------------------------------------------

    /// Apply a batch of field updates to record `id`.
    ///
    /// Fields are judged independently; losing fields are skipped without
    /// failing the rest. `source` tags the call in logs and notifications.
    pub fn update_record(&self, id: &str, updates: &[FieldUpdate], source: &str) -> UpdateOutcome {
        if updates.is_empty() {
            return self.invalid(id, source, "empty batch");
        }

        let (lock, current) = match self.open_gate(id, source) {
            Gate::Open(lock, current) => (lock, current),
            Gate::Closed(outcome) => return outcome,
        };

        let resolution = resolve(&current, updates);
        if resolution.valid == 0 {
            release(lock);
            return self.invalid(id, source, "no valid fields");
        }
        if !resolution.has_winners() {
            release(lock);
            self.ops.emit(
                OpsEvent::new(COMPONENT, "stale_rejected", OpsLevel::Debug)
                    .with("id", id)
                    .with("source", source)
                    .with("skipped", &resolution.skipped),
            );
            return UpdateOutcome::stale(resolution.skipped);
        }

        if let Err(e) = self.store.apply_patch(id, &resolution.patch) {
            release(lock);
            return self.failed(id, source, &e.to_string());
        }
        release(lock);

        debug!(
            "Updated {} from {}: {:?} ({} skipped)",
            id,
            source,
            resolution.updated,
            resolution.skipped.len()
        );
        if !resolution.skipped.is_empty() {
            self.ops.emit(
                OpsEvent::new(COMPONENT, "fields_skipped", OpsLevel::Debug)
                    .with("id", id)
                    .with("source", source)
                    .with("skipped", &resolution.skipped),
            );
        }
        if let Some(after) = &resolution.record {
            self.notify(after, &resolution.updated, source);
        }

        UpdateOutcome::success(resolution.updated, resolution.skipped)
    }

    // ---------------------------------------------------------------
    // Forced termination
    // ---------------------------------------------------------------

    /// Move a record straight to ENDED, bypassing version negotiation.
    ///
    /// Reserved for the recovery ladder's last resort. Still serialized by
    /// the record lock and still refuses a record that already ended.
    pub fn force_terminate(&self, id: &str, reason: &str) -> UpdateOutcome {
        let (lock, current) = match self.open_gate(id, FORCE_SOURCE) {
            Gate::Open(lock, current) => (lock, current),
            Gate::Closed(outcome) => return outcome,
        };

        let now = now_secs();
        let mut patch = RecordPatch::default();
        patch.push(
            FieldValue::Status(EventStatus::Ended),
            FieldVersion {
                priority: priority::FORCED,
                timestamp: now,
                source: FORCE_SOURCE.to_string(),
            },
            true,
        );
        if let Err(e) = self.store.apply_patch(id, &patch) {
            release(lock);
            return self.failed(id, FORCE_SOURCE, &e.to_string());
        }
        release(lock);

        self.ops.emit(
            OpsEvent::new(COMPONENT, "force_terminated", OpsLevel::Critical)
                .with("id", id)
                .with("reason", reason)
                .with("previous_status", current.record.status)
                .with("minute", current.record.minute),
        );

        let mut after = current.record;
        after.status = EventStatus::Ended;
        self.notify(&after, &[Field::Status], FORCE_SOURCE);

        UpdateOutcome::success(vec![Field::Status], Vec::new())
    }

    // ---------------------------------------------------------------
    // Async entry points
    // ---------------------------------------------------------------

    /// [`update_record`](Self::update_record) on the blocking pool, so async
    /// callers never hold a runtime worker during SQLite I/O.
    pub async fn submit(
        self: &Arc<Self>,
        id: &str,
        updates: Vec<FieldUpdate>,
        source: &str,
    ) -> UpdateOutcome {
        let this = Arc::clone(self);
        let (id, source) = (id.to_string(), source.to_string());
        tokio::task::spawn_blocking(move || this.update_record(&id, &updates, &source))
            .await
            .unwrap_or_else(|e| UpdateOutcome::error(format!("update task failed: {}", e)))
    }

    /// [`force_terminate`](Self::force_terminate) on the blocking pool.
    pub async fn submit_force_terminate(self: &Arc<Self>, id: &str, reason: &str) -> UpdateOutcome {
        let this = Arc::clone(self);
        let (id, reason) = (id.to_string(), reason.to_string());
        tokio::task::spawn_blocking(move || this.force_terminate(&id, &reason))
            .await
            .unwrap_or_else(|e| UpdateOutcome::error(format!("terminate task failed: {}", e)))
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    fn open_gate(&self, id: &str, source: &str) -> Gate<'_> {
        if !is_valid_external_id(id) {
            return Gate::Closed(self.invalid(id, source, "malformed id"));
        }

        let lock = match self.store.try_lock(id, self.lock_ttl_secs) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                self.ops.emit(
                    OpsEvent::new(COMPONENT, "lock_busy", OpsLevel::Info)
                        .with("id", id)
                        .with("source", source),
                );
                return Gate::Closed(UpdateOutcome::rejected(OutcomeStatus::RejectedLocked));
            }
            Err(e) => return Gate::Closed(self.failed(id, source, &e.to_string())),
        };

        let current = match self.store.load_versioned(id) {
            Ok(Some(current)) => current,
            Ok(None) => {
                release(lock);
                return Gate::Closed(self.invalid(id, source, "unknown record"));
            }
            Err(e) => {
                release(lock);
                return Gate::Closed(self.failed(id, source, &e.to_string()));
            }
        };

        if current.record.status.is_terminal() {
            release(lock);
            self.ops.emit(
                OpsEvent::new(COMPONENT, "immutable_rejected", OpsLevel::Warn)
                    .with("id", id)
                    .with("source", source),
            );
            return Gate::Closed(UpdateOutcome::rejected(OutcomeStatus::RejectedImmutable));
        }

        Gate::Open(lock, current)
    }

    fn notify(&self, after: &scoreline_core::EventRecord, updated: &[Field], source: &str) {
        let fields: Vec<Field> = updated.iter().copied().filter(|f| f.is_broadcast()).collect();
        if fields.is_empty() {
            return;
        }
        self.changes
            .publish(RecordChange::from_record(after, fields, source, now_secs()));
    }

    fn invalid(&self, id: &str, source: &str, why: &str) -> UpdateOutcome {
        self.ops.emit(
            OpsEvent::new(COMPONENT, "invalid_rejected", OpsLevel::Warn)
                .with("id", id)
                .with("source", source)
                .with("reason", why),
        );
        UpdateOutcome::rejected(OutcomeStatus::RejectedInvalid)
    }

    fn failed(&self, id: &str, source: &str, message: &str) -> UpdateOutcome {
        self.ops.emit(
            OpsEvent::new(COMPONENT, "write_failed", OpsLevel::Error)
                .with("id", id)
                .with("source", source)
                .with("error", message),
        );
        UpdateOutcome::error(message)
    }
}

fn release(lock: RecordLock<'_>) {
    if let Err(e) = lock.release() {
        warn!("Lock release failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastSink;
    use scoreline_core::{MemorySink, SkipReason};
    use tempfile::TempDir;

    struct Fixture {
        orch: WriteOrchestrator,
        sink: Arc<MemorySink>,
        changes: Arc<BroadcastSink>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("scoreline.db")).unwrap());
        store.upsert_schedule("m1", 1_000).unwrap();
        let sink = MemorySink::new();
        let changes = BroadcastSink::shared(16);
        let orch = WriteOrchestrator::new(store, changes.clone(), sink.clone(), 30);
        Fixture {
            orch,
            sink,
            changes,
            _dir: dir,
        }
    }

    fn upd(value: FieldValue, priority: u32, ts: i64) -> FieldUpdate {
        FieldUpdate::new(value, "test", priority, ts)
    }

    #[test]
    fn test_update_persists_and_reports_fields() {
        let f = fixture();
        let outcome = f.orch.update_record(
            "m1",
            &[
                upd(FieldValue::Status(EventStatus::Phase1), 20, 100),
                upd(FieldValue::ScoreHome(Some(1)), 20, 100),
            ],
            "poller",
        );
        assert!(outcome.is_success());
        assert_eq!(outcome.fields_updated, vec![Field::Status, Field::ScoreHome]);

        let record = f.orch.store().get("m1").unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Phase1);
        assert_eq!(record.score_home, Some(1));
        // Lock released.
        assert!(f.orch.store().lock_holder("m1").unwrap().is_none());
    }

    #[test]
    fn test_malformed_id_is_invalid() {
        let f = fixture();
        let outcome = f.orch.update_record(
            "bad id; drop",
            &[upd(FieldValue::ScoreHome(Some(1)), 20, 100)],
            "poller",
        );
        assert_eq!(outcome.status, OutcomeStatus::RejectedInvalid);
        assert_eq!(f.sink.count("invalid_rejected"), 1);
    }

    #[test]
    fn test_unknown_record_is_invalid() {
        let f = fixture();
        let outcome =
            f.orch
                .update_record("ghost", &[upd(FieldValue::ScoreHome(Some(1)), 20, 100)], "poller");
        assert_eq!(outcome.status, OutcomeStatus::RejectedInvalid);
        assert!(f.orch.store().lock_holder("ghost").unwrap().is_none());
    }

    #[test]
    fn test_all_stale_is_rejected_stale() {
        let f = fixture();
        f.orch
            .update_record("m1", &[upd(FieldValue::ScoreHome(Some(2)), 40, 500)], "feed");
        let outcome = f
            .orch
            .update_record("m1", &[upd(FieldValue::ScoreHome(Some(0)), 20, 900)], "poller");
        assert_eq!(outcome.status, OutcomeStatus::RejectedStale);
        assert_eq!(outcome.skipped[0].reason, SkipReason::Stale);
        assert_eq!(f.orch.store().get("m1").unwrap().unwrap().score_home, Some(2));
    }

    #[test]
    fn test_locked_record_is_rejected_without_waiting() {
        let f = fixture();
        let _held = f.orch.store().try_lock("m1", 30).unwrap().unwrap();
        let outcome = f
            .orch
            .update_record("m1", &[upd(FieldValue::ScoreHome(Some(1)), 20, 100)], "poller");
        assert_eq!(outcome.status, OutcomeStatus::RejectedLocked);
        assert!(outcome.is_retryable());
        assert_eq!(f.orch.store().get("m1").unwrap().unwrap().score_home, None);
        assert_eq!(f.sink.count("lock_busy"), 1);
    }

    #[test]
    fn test_ended_record_is_immutable() {
        let f = fixture();
        f.orch
            .update_record("m1", &[upd(FieldValue::Status(EventStatus::Ended), 20, 100)], "poller");
        let outcome = f.orch.update_record(
            "m1",
            &[upd(FieldValue::ScoreHome(Some(7)), u32::MAX, i64::MAX)],
            "manual",
        );
        assert_eq!(outcome.status, OutcomeStatus::RejectedImmutable);
        assert!(outcome.fields_updated.is_empty());
        assert_eq!(f.sink.count("immutable_rejected"), 1);
    }

    #[test]
    fn test_force_terminate() {
        let f = fixture();
        let mut rx = f.changes.subscribe();
        let outcome = f.orch.force_terminate("m1", "auto_terminate");
        assert!(outcome.is_success());

        let loaded = f.orch.store().load_versioned("m1").unwrap().unwrap();
        assert_eq!(loaded.record.status, EventStatus::Ended);
        assert_eq!(loaded.versions[&Field::Status].priority, priority::FORCED);

        let events = f.sink.named("force_terminated");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, OpsLevel::Critical);
        assert_eq!(rx.try_recv().unwrap().status, EventStatus::Ended);

        let again = f.orch.force_terminate("m1", "auto_terminate");
        assert_eq!(again.status, OutcomeStatus::RejectedImmutable);
    }

    #[test]
    fn test_force_terminate_respects_lock() {
        let f = fixture();
        let _held = f.orch.store().try_lock("m1", 30).unwrap().unwrap();
        let outcome = f.orch.force_terminate("m1", "auto_terminate");
        assert_eq!(outcome.status, OutcomeStatus::RejectedLocked);
    }

    #[test]
    fn test_only_broadcast_fields_are_published() {
        let f = fixture();
        let mut rx = f.changes.subscribe();
        f.orch.update_record(
            "m1",
            &[
                upd(FieldValue::LastEventTs(100), 20, 100),
                upd(FieldValue::Minute(Some(3)), 20, 100),
            ],
            "poller",
        );
        let change = rx.try_recv().unwrap();
        assert_eq!(change.fields, vec![Field::Minute]);
        assert_eq!(change.minute, Some(3));

        f.orch
            .update_record("m1", &[upd(FieldValue::LastEventTs(200), 20, 200)], "poller");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_async_entry_points_run_off_the_runtime() {
        let Fixture { orch, _dir, .. } = fixture();
        let orch = Arc::new(orch);

        let outcome = orch
            .submit("m1", vec![upd(FieldValue::Status(EventStatus::Phase1), 20, 100)], "poller")
            .await;
        assert_eq!(outcome.fields_updated, vec![Field::Status]);

        let outcome = orch.submit_force_terminate("m1", "auto_terminate").await;
        assert!(outcome.is_success());
        assert_eq!(orch.store().get("m1").unwrap().unwrap().status, EventStatus::Ended);

        let again = orch.submit_force_terminate("m1", "auto_terminate").await;
        assert_eq!(again.status, OutcomeStatus::RejectedImmutable);
    }
}
