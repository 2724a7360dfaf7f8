//! Producers: bucket scans and the change-feed poller.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use scoreline_core::{priority, Error, EventStatus, Result};
use scoreline_store::SqliteStore;
use tracing::{debug, info};

use crate::queue::{EnqueueResult, ReconcileQueue};
use crate::reconcile::{ReconcileResult, Reconciler};

/// Source tag for change-feed submissions.
pub const CHANGE_FEED_SOURCE: &str = "change_feed";

fn enqueue_all<'a>(queue: &ReconcileQueue, ids: impl IntoIterator<Item = &'a str>) -> usize {
    ids.into_iter()
        .filter(|id| queue.enqueue(id) == EnqueueResult::Queued)
        .count()
}

/// Queue every record currently in a live phase. Returns the number newly queued.
pub fn live_scan(store: &SqliteStore, queue: &ReconcileQueue) -> Result<usize> {
    let ids = store.ids_with_status(&EventStatus::LIVE)?;
    let queued = enqueue_all(queue, ids.iter().map(String::as_str));
    debug!("Live scan: {} live, {} queued", ids.len(), queued);
    Ok(queued)
}

/// Queue pre-match records scheduled within `window_secs` ahead of `now`, or
/// already past their start within `lookback_secs`.
pub fn upcoming_scan(
    store: &SqliteStore,
    queue: &ReconcileQueue,
    now: i64,
    window_secs: i64,
    lookback_secs: i64,
) -> Result<usize> {
    let records = store.pre_match_scheduled_between(now - lookback_secs, now + window_secs)?;
    let queued = enqueue_all(queue, records.iter().map(|r| r.external_id.as_str()));
    debug!("Upcoming scan: {} due, {} queued", records.len(), queued);
    Ok(queued)
}

/// Polls the provider's change feed and reconciles changed, known records at
/// change-feed priority. Contended records fall back to the queue.
pub struct ChangeFeedPoller {
    store: Arc<SqliteStore>,
    reconciler: Arc<Reconciler>,
    queue: Arc<ReconcileQueue>,
    cursor: AtomicI64,
}

impl ChangeFeedPoller {
    pub fn new(
        store: Arc<SqliteStore>,
        reconciler: Arc<Reconciler>,
        queue: Arc<ReconcileQueue>,
        start: i64,
    ) -> Self {
        info!("ChangeFeedPoller initialized: cursor={}", start);
        Self {
            store,
            reconciler,
            queue,
            cursor: AtomicI64::new(start),
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// One poll. Returns the number of records that changed.
    ///
    /// An open circuit is a quiet skip; the cursor stays put so nothing is
    /// missed once the provider is back.
    pub async fn poll_at(&self, now: i64) -> Result<usize> {
        let since = self.cursor();
        let ids = match self.reconciler.feed().fetch_changed_ids(since).await {
            Ok(ids) => ids,
            Err(e) if e.is_circuit_open() => {
                debug!("Change feed skipped: circuit open");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let fetched = ids.len();
        let store = Arc::clone(&self.store);
        let known = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut known = Vec::with_capacity(ids.len());
            for id in ids {
                if store.exists(&id)? {
                    known.push(id);
                }
            }
            Ok(known)
        })
        .await
        .map_err(|e| Error::Internal(format!("change feed lookup failed: {}", e)))??;

        let mut changed = 0;
        for id in &known {
            match self
                .reconciler
                .reconcile_as(id, CHANGE_FEED_SOURCE, priority::CHANGE_FEED)
                .await
            {
                Ok(ReconcileResult::Submitted(outcome)) if outcome.is_retryable() => {
                    self.queue.enqueue(id);
                }
                Ok(result) => {
                    if result.changed() {
                        changed += 1;
                    }
                }
                Err(e) if e.is_circuit_open() => {
                    // Cursor must not move past ids we never fetched.
                    return Ok(changed);
                }
                Err(e) if e.is_retryable() => {
                    self.queue.enqueue(id);
                }
                Err(e) => debug!("Change feed reconcile of {} failed: {}", id, e),
            }
        }

        self.cursor.store(now, Ordering::Release);
        debug!("Change feed: {} ids since {}, {} changed", fetched, since, changed);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use scoreline_core::{EventStatus, FieldUpdate, FieldValue, MemorySink, QueueConfig};
    use scoreline_orchestrator::{NullSink, WriteOrchestrator};
    use scoreline_upstream::{LiveFeed, LiveFields};
    use tempfile::TempDir;

    #[derive(Default)]
    struct ChangesFeed {
        changed: Vec<String>,
        since_seen: Mutex<Vec<i64>>,
    }

    impl LiveFeed for ChangesFeed {
        fn fetch_live<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, Result<Option<LiveFields>>> {
            Box::pin(async {
                Ok(Some(LiveFields {
                    status: Some(EventStatus::Phase2),
                    score_home: Some(1),
                    ..LiveFields::default()
                }))
            })
        }

        fn fetch_changed_ids(&self, since: i64) -> BoxFuture<'_, Result<Vec<String>>> {
            self.since_seen.lock().push(since);
            let ids = self.changed.clone();
            Box::pin(async move { Ok(ids) })
        }
    }

    struct Setup {
        store: Arc<SqliteStore>,
        orch: Arc<WriteOrchestrator>,
        reconciler: Arc<Reconciler>,
        queue: Arc<ReconcileQueue>,
        _dir: TempDir,
    }

    fn setup(feed: Arc<ChangesFeed>) -> Setup {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("scoreline.db")).unwrap());
        let sink = MemorySink::new();
        let orch = Arc::new(WriteOrchestrator::new(
            store.clone(),
            Arc::new(NullSink),
            sink.clone(),
            30,
        ));
        let reconciler = Arc::new(Reconciler::new(feed, orch.clone(), sink.clone()));
        let queue = Arc::new(ReconcileQueue::new(
            reconciler.clone(),
            QueueConfig::default(),
            sink,
        ));
        Setup {
            store,
            orch,
            reconciler,
            queue,
            _dir: dir,
        }
    }

    fn set_status(orch: &WriteOrchestrator, id: &str, status: EventStatus) {
        let update = FieldUpdate::new(FieldValue::Status(status), "test", 20, 100);
        assert!(orch.update_record(id, &[update], "test").is_success());
    }

    #[test]
    fn test_live_scan_queues_live_records_only() {
        let s = setup(Arc::new(ChangesFeed::default()));
        for id in ["a", "b", "c"] {
            s.store.upsert_schedule(id, 1_000).unwrap();
        }
        set_status(&s.orch, "a", EventStatus::Phase1);
        set_status(&s.orch, "b", EventStatus::Interrupted);

        assert_eq!(live_scan(&s.store, &s.queue).unwrap(), 2);
        // Repeat scans are absorbed.
        assert_eq!(live_scan(&s.store, &s.queue).unwrap(), 0);
        assert_eq!(s.queue.depth(), 2);
    }

    #[test]
    fn test_upcoming_scan_window() {
        let s = setup(Arc::new(ChangesFeed::default()));
        let now = 100_000;
        s.store.upsert_schedule("soon", now + 600).unwrap();
        s.store.upsert_schedule("later", now + 3_600).unwrap();
        s.store.upsert_schedule("overdue", now - 1_200).unwrap();
        s.store.upsert_schedule("ancient", now - 100_000).unwrap();

        assert_eq!(upcoming_scan(&s.store, &s.queue, now, 900, 43_200).unwrap(), 2);
        assert!(s.queue.is_pending("soon"));
        assert!(s.queue.is_pending("overdue"));
        assert!(!s.queue.is_pending("later"));
    }

    #[tokio::test]
    async fn test_change_feed_reconciles_known_ids() {
        let feed = Arc::new(ChangesFeed {
            changed: vec!["known".into(), "stranger".into()],
            ..ChangesFeed::default()
        });
        let s = setup(feed.clone());
        s.store.upsert_schedule("known", 1_000).unwrap();
        let poller = ChangeFeedPoller::new(s.store.clone(), s.reconciler.clone(), s.queue.clone(), 50);

        assert_eq!(poller.poll_at(500).await.unwrap(), 1);
        assert_eq!(poller.cursor(), 500);
        assert!(!s.store.exists("stranger").unwrap());

        let loaded = s.store.load_versioned("known").unwrap().unwrap();
        assert_eq!(loaded.record.status, EventStatus::Phase2);
        assert_eq!(loaded.versions[&scoreline_core::Field::Status].priority, priority::CHANGE_FEED);

        poller.poll_at(900).await.unwrap();
        assert_eq!(*feed.since_seen.lock(), vec![50, 500]);
    }

    #[tokio::test]
    async fn test_change_feed_queues_locked_records() {
        let feed = Arc::new(ChangesFeed {
            changed: vec!["busy".into()],
            ..ChangesFeed::default()
        });
        let s = setup(feed);
        s.store.upsert_schedule("busy", 1_000).unwrap();
        let _held = s.store.try_lock("busy", 30).unwrap().unwrap();
        let poller = ChangeFeedPoller::new(s.store.clone(), s.reconciler.clone(), s.queue.clone(), 0);

        assert_eq!(poller.poll_at(10).await.unwrap(), 0);
        assert!(s.queue.is_pending("busy"));
    }
}
