//! Named periodic jobs with an overlap guard and a per-run timeout.
//!
//! Each tick spawns the run as its own task, so a slow run never delays the
//! ticker. While a run is in flight later ticks are skipped. A run that
//! exceeds the timeout is dropped; its guard resets the in-flight flag.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scoreline_core::Result;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
    TimedOut,
    /// Previous run still in flight.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub name: &'static str,
    pub running: bool,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    skipped: AtomicU64,
}

/// Clears the in-flight flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PeriodicJob {
    name: &'static str,
    interval: Duration,
    timeout: Duration,
    running: AtomicBool,
    counters: Counters,
}

impl PeriodicJob {
    pub fn new(name: &'static str, interval: Duration, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            interval,
            timeout,
            running: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `work` once unless a previous run is still in flight.
    ///
    /// Errors are logged and counted; they never escape.
    pub async fn run_once<Fut>(&self, work: Fut) -> RunOutcome
    where
        Fut: Future<Output = Result<()>>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!("Job {} still running, skipping tick", self.name);
            return RunOutcome::Skipped;
        }
        let _guard = RunGuard(&self.running);

        match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(())) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                RunOutcome::Completed
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Job {} failed: {}", self.name, e);
                RunOutcome::Failed
            }
            Err(_) => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Job {} timed out after {}s, abandoned",
                    self.name,
                    self.timeout.as_secs()
                );
                RunOutcome::TimedOut
            }
        }
    }

    /// Tick forever, spawning `make_work()` as a guarded run each time.
    pub fn spawn<F, Fut>(self: &Arc<Self>, make_work: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "Periodic job {} started (every {}s)",
                job.name,
                job.interval.as_secs_f64()
            );
            let mut ticker = tokio::time::interval(job.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if job.running.load(Ordering::Acquire) {
                    job.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!("Job {} still running, skipping tick", job.name);
                    continue;
                }
                let run = Arc::clone(&job);
                let work = make_work();
                tokio::spawn(async move {
                    run.run_once(work).await;
                });
            }
        })
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            name: self.name,
            running: self.running.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreline_core::Error;

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_run_is_skipped() {
        let job = PeriodicJob::new("slow", Duration::from_secs(1), Duration::from_secs(60));

        let first = {
            let job = Arc::clone(&job);
            tokio::spawn(async move {
                job.run_once(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        assert_eq!(job.run_once(async { Ok(()) }).await, RunOutcome::Skipped);
        assert_eq!(first.await.unwrap(), RunOutcome::Completed);
        assert_eq!(job.run_once(async { Ok(()) }).await, RunOutcome::Completed);

        let stats = job.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.skipped, 1);
        assert!(!stats.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_guard() {
        let job = PeriodicJob::new("stuck", Duration::from_secs(1), Duration::from_secs(2));
        let outcome = job
            .run_once(async {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(())
            })
            .await;
        assert_eq!(outcome, RunOutcome::TimedOut);
        assert_eq!(job.run_once(async { Ok(()) }).await, RunOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_contained() {
        let job = PeriodicJob::new("flaky", Duration::from_secs(1), Duration::from_secs(2));
        let outcome = job
            .run_once(async { Err(Error::Database("connection lost".into())) })
            .await;
        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(job.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_job_ticks() {
        let job = PeriodicJob::new("tick", Duration::from_secs(10), Duration::from_secs(5));
        let handle = job.spawn(|| async { Ok(()) });
        tokio::time::sleep(Duration::from_secs(35)).await;
        handle.abort();
        assert!(job.stats().completed >= 3);
    }
}
