use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use scoreline_core::{
    priority, DetectorConfig, EventStatus, FieldUpdate, FieldValue, MemorySink, OpsLevel, Result,
    StaleReason,
};
use scoreline_orchestrator::{NullSink, WriteOrchestrator};
use scoreline_recovery::{StalenessDetector, RecoveryLadder};
use scoreline_runtime::Reconciler;
use scoreline_store::SqliteStore;
use scoreline_upstream::{LiveFeed, LiveFields};
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000;

/// Answers per id from a script; unknown ids have no data.
#[derive(Default)]
struct ScriptedFeed {
    answers: Mutex<HashMap<String, LiveFields>>,
}

impl LiveFeed for ScriptedFeed {
    fn fetch_live<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<LiveFields>>> {
        let answer = self.answers.lock().get(id).cloned();
        Box::pin(async move { Ok(answer) })
    }

    fn fetch_changed_ids(&self, _since: i64) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

struct World {
    store: Arc<SqliteStore>,
    orch: Arc<WriteOrchestrator>,
    ladder: RecoveryLadder,
    feed: Arc<ScriptedFeed>,
    sink: Arc<MemorySink>,
    _dir: TempDir,
}

fn world() -> World {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("scoreline.db")).unwrap());
    let sink = MemorySink::new();
    let orch = Arc::new(WriteOrchestrator::new(
        store.clone(),
        Arc::new(NullSink),
        sink.clone(),
        30,
    ));
    let feed = Arc::new(ScriptedFeed::default());
    let reconciler = Arc::new(Reconciler::new(feed.clone(), orch.clone(), sink.clone()));
    let detector = StalenessDetector::new(store.clone(), DetectorConfig::default());
    let ladder = RecoveryLadder::new(detector, reconciler, sink.clone());
    World {
        store,
        orch,
        ladder,
        feed,
        sink,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_recoverable_staleness() {
    let w = world();
    w.store.upsert_schedule("m1", NOW - 1_800).unwrap();
    let outcome = w.orch.update_record(
        "m1",
        &[
            FieldUpdate::new(FieldValue::Status(EventStatus::Phase1), "poller", priority::POLLER, NOW - 1_700),
            FieldUpdate::new(FieldValue::LastEventTs(NOW - 200), "poller", priority::POLLER, NOW - 200),
        ],
        "poller",
    );
    assert!(outcome.is_success());

    w.feed.answers.lock().insert(
        "m1".into(),
        LiveFields {
            status: Some(EventStatus::Intermission),
            minute: Some(45),
            last_event_ts: Some(NOW - 5),
            provider_update_time: Some(NOW - 5),
            ..LiveFields::default()
        },
    );

    let report = w.ladder.tick_at(NOW).await.unwrap();
    assert_eq!(report.detected, 1);
    assert_eq!(report.recovered, 1);

    let detected = w.sink.named("stale_detected");
    assert_eq!(detected[0].field("reason").unwrap(), StaleReason::Stale.as_str());
    assert_eq!(detected[0].field("age_seconds").unwrap(), 200);
    assert_eq!(w.sink.count("marked_unresolved"), 0);

    let record = w.store.get("m1").unwrap().unwrap();
    assert_eq!(record.status, EventStatus::Intermission);
    assert_eq!(record.minute, Some(45));
}

#[tokio::test]
async fn test_forced_termination_of_abandoned_record() {
    let w = world();
    w.store.upsert_schedule("m1", NOW - 3 * 3_600).unwrap();

    let report = w.ladder.tick_at(NOW).await.unwrap();
    assert_eq!(report.detected, 1);
    assert_eq!(report.force_terminated, 1);

    let record = w.store.get("m1").unwrap().unwrap();
    assert_eq!(record.status, EventStatus::Ended);

    let critical: Vec<_> = w
        .sink
        .events()
        .into_iter()
        .filter(|e| e.level == OpsLevel::Critical)
        .collect();
    assert!(critical.iter().any(|e| e.event == "force_terminated"));
    assert!(critical.iter().any(|e| e.event == "recovery_exhausted"));

    // Terminal now: nothing left to detect.
    let next = w.ladder.tick_at(NOW + 600).await.unwrap();
    assert_eq!(next.detected, 0);
}

#[tokio::test]
async fn test_no_data_below_terminate_age_is_unresolved() {
    let w = world();
    w.store.upsert_schedule("m1", NOW - 1_200).unwrap();

    let report = w.ladder.tick_at(NOW).await.unwrap();
    assert_eq!(report.unresolved, 1);
    assert_eq!(w.sink.count("marked_unresolved"), 1);
    assert_eq!(
        w.store.get("m1").unwrap().unwrap().status,
        EventStatus::NotStarted
    );
}

#[tokio::test]
async fn test_locked_record_is_deferred() {
    let w = world();
    w.store.upsert_schedule("m1", NOW - 3 * 3_600).unwrap();
    let _held = w.store.try_lock("m1", 30).unwrap().unwrap();

    let report = w.ladder.tick_at(NOW).await.unwrap();
    assert_eq!(report.deferred_locked, 1);
    assert_eq!(report.force_terminated, 0);
    assert_eq!(w.sink.count("reconcile_deferred"), 1);
}

#[tokio::test]
async fn test_unchanging_provider_data_is_unresolved_not_ended() {
    let w = world();
    w.store.upsert_schedule("m1", NOW - 3 * 3_600).unwrap();
    let postponed = w.orch.update_record(
        "m1",
        &[FieldUpdate::new(
            FieldValue::Status(EventStatus::Delayed),
            "poller",
            priority::POLLER,
            NOW - 3_000,
        )],
        "poller",
    );
    assert!(postponed.is_success());
    w.feed.answers.lock().insert(
        "m1".into(),
        LiveFields {
            status: Some(EventStatus::Delayed),
            ..LiveFields::default()
        },
    );

    let report = w.ladder.tick_at(NOW).await.unwrap();
    assert_eq!(report.detected, 1);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.force_terminated, 0);
    assert_eq!(report.unresolved, 1);

    assert_eq!(
        w.store.get("m1").unwrap().unwrap().status,
        EventStatus::Delayed
    );
    assert_eq!(w.sink.count("force_terminated"), 0);
    assert_eq!(w.sink.count("recovery_exhausted"), 0);
    let unresolved = w.sink.named("marked_unresolved");
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].field("outcome").unwrap(), "success");
}

#[tokio::test]
async fn test_storage_failure_is_unresolved_not_ended() {
    let w = world();
    w.store.upsert_schedule("m1", NOW - 3 * 3_600).unwrap();
    w.feed.answers.lock().insert(
        "m1".into(),
        LiveFields {
            status: Some(EventStatus::Phase1),
            ..LiveFields::default()
        },
    );
    // Reads keep working; every write to the record fails.
    let conn = rusqlite::Connection::open(w.store.db_path()).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER refuse_writes BEFORE UPDATE ON events
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
    )
    .unwrap();

    let report = w.ladder.tick_at(NOW).await.unwrap();
    assert_eq!(report.detected, 1);
    assert_eq!(report.force_terminated, 0);
    assert_eq!(report.unresolved, 1);

    // Only the reconcile write was attempted.
    assert_eq!(w.sink.count("write_failed"), 1);
    let unresolved = w.sink.named("marked_unresolved");
    assert_eq!(unresolved[0].field("outcome").unwrap(), "error");
    assert!(unresolved[0].field("error").is_some());
    assert_eq!(
        w.store.get("m1").unwrap().unwrap().status,
        EventStatus::NotStarted
    );
}
