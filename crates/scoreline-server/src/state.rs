//! Shared application state: one instance of every component, built once at
//! startup and handed to routes and background tasks.

use std::sync::Arc;

use parking_lot::RwLock;
use scoreline_core::{now_secs, Result, ScorelineConfig, SharedOps};
use scoreline_governor::Governor;
use scoreline_orchestrator::{BroadcastSink, WriteOrchestrator};
use scoreline_recovery::{RecoveryLadder, StalenessDetector};
use scoreline_runtime::{ChangeFeedPoller, PeriodicJob, ReconcileQueue, Reconciler};
use scoreline_store::SqliteStore;
use scoreline_upstream::{HttpLiveFeed, LiveFeed, UpstreamClient};

/// Capacity of the in-process change broadcast.
const CHANGE_CHANNEL_CAPACITY: usize = 1_024;

pub struct AppState {
    pub config: ScorelineConfig,
    pub store: Arc<SqliteStore>,
    pub governor: Arc<Governor>,
    pub changes: Arc<BroadcastSink>,
    pub orchestrator: Arc<WriteOrchestrator>,
    pub queue: Arc<ReconcileQueue>,
    pub ladder: Arc<RecoveryLadder>,
    pub poller: Arc<ChangeFeedPoller>,
    pub jobs: RwLock<Vec<Arc<PeriodicJob>>>,
    pub started_at: i64,
}

impl AppState {
    /// Wire the production feed: the provider's HTTP API behind one governor.
    pub fn new(config: ScorelineConfig, ops: SharedOps) -> Result<Self> {
        let governor = Arc::new(Governor::new(&config.governor, ops.clone()));
        let client = UpstreamClient::new(&config.upstream)?;
        let feed: Arc<dyn LiveFeed> = Arc::new(HttpLiveFeed::new(client, governor.clone()));
        Self::with_feed(config, governor, feed, ops)
    }

    /// Wire everything around a given feed.
    pub fn with_feed(
        config: ScorelineConfig,
        governor: Arc<Governor>,
        feed: Arc<dyn LiveFeed>,
        ops: SharedOps,
    ) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.db_path)?);
        let changes = BroadcastSink::shared(CHANGE_CHANNEL_CAPACITY);
        let orchestrator = Arc::new(WriteOrchestrator::new(
            store.clone(),
            changes.clone(),
            ops.clone(),
            config.lock_ttl_secs,
        ));
        let reconciler = Arc::new(Reconciler::new(feed, orchestrator.clone(), ops.clone()));
        let queue = Arc::new(ReconcileQueue::new(
            reconciler.clone(),
            config.queue.clone(),
            ops.clone(),
        ));
        let detector = StalenessDetector::new(store.clone(), config.detector.clone());
        let ladder = Arc::new(RecoveryLadder::new(detector, reconciler.clone(), ops));
        let started_at = now_secs();
        let poller = Arc::new(ChangeFeedPoller::new(
            store.clone(),
            reconciler,
            queue.clone(),
            started_at,
        ));

        Ok(Self {
            config,
            store,
            governor,
            changes,
            orchestrator,
            queue,
            ladder,
            poller,
            jobs: RwLock::new(Vec::new()),
            started_at,
        })
    }
}
