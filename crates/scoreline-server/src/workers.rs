//! Background tasks: queue drain, bucket scans, change feed, recovery ladder.

use std::sync::Arc;
use std::time::Duration;

use scoreline_core::{now_secs, Error, Result};
use scoreline_runtime::{live_scan, upcoming_scan, PeriodicJob};
use tracing::{debug, info};

use crate::state::AppState;

/// Run a store-bound scan on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Internal(format!("scan task failed: {}", e)))?
}

/// Start every periodic task. Each runs independently on its own cadence.
pub fn start_background_tasks(state: Arc<AppState>) {
    state.queue.clone().start();

    let scans = &state.config.scans;
    let timeout = Duration::from_secs(scans.job_timeout_secs);

    let live = PeriodicJob::new(
        "live_scan",
        Duration::from_secs(scans.live_interval_secs),
        timeout,
    );
    let s = state.clone();
    live.spawn(move || {
        let s = s.clone();
        async move {
            let queued = blocking(move || live_scan(&s.store, &s.queue)).await?;
            debug!("live_scan queued {}", queued);
            Ok::<(), Error>(())
        }
    });

    let upcoming = PeriodicJob::new(
        "upcoming_scan",
        Duration::from_secs(scans.upcoming_interval_secs),
        timeout,
    );
    let s = state.clone();
    upcoming.spawn(move || {
        let s = s.clone();
        async move {
            blocking(move || {
                upcoming_scan(
                    &s.store,
                    &s.queue,
                    now_secs(),
                    s.config.scans.upcoming_window_secs,
                    s.config.detector.should_be_active_grace_secs,
                )
            })
            .await?;
            Ok::<(), Error>(())
        }
    });

    let change_feed = PeriodicJob::new(
        "change_feed",
        Duration::from_secs(scans.change_feed_interval_secs),
        timeout,
    );
    let s = state.clone();
    change_feed.spawn(move || {
        let s = s.clone();
        async move {
            s.poller.poll_at(now_secs()).await?;
            Ok::<(), Error>(())
        }
    });

    let recovery = PeriodicJob::new(
        "recovery",
        Duration::from_secs(state.config.detector.interval_secs),
        timeout,
    );
    let s = state.clone();
    recovery.spawn(move || {
        let s = s.clone();
        async move {
            s.ladder.tick().await?;
            Ok::<(), Error>(())
        }
    });

    *state.jobs.write() = vec![live, upcoming, change_feed, recovery];
    info!("Background tasks started");
}
