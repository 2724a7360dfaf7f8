//! Deduplicated, bounded reconcile queue with a serial drain loop.
//!
//! Ids are kept in arrival order alongside a pending set. A drain pops up to
//! `batch_limit` ids and removes them from the set before touching upstream,
//! so a producer enqueueing the same id mid-drain queues it again instead of
//! having it silently absorbed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use scoreline_core::{OpsEvent, OpsLevel, QueueConfig, SharedOps};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::reconcile::{ReconcileResult, Reconciler};

const COMPONENT: &str = "queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueResult {
    Queued,
    /// Already pending; absorbed.
    Duplicate,
    /// At `max_pending`; refused.
    Full,
}

/// Totals for one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub taken: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub retried: usize,
    pub dropped: usize,
    /// Returned to the queue untouched because the circuit was open.
    pub deferred: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub depth: usize,
    pub max_pending: usize,
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dropped: u64,
    pub rejected_full: u64,
}

#[derive(Default)]
struct QueueInner {
    order: VecDeque<String>,
    pending: HashSet<String>,
    attempts: HashMap<String, u32>,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    rejected_full: AtomicU64,
}

enum Step {
    Done,
    Retry,
    Defer,
}

pub struct ReconcileQueue {
    inner: Mutex<QueueInner>,
    reconciler: Arc<Reconciler>,
    config: QueueConfig,
    counters: Counters,
    ops: SharedOps,
}

impl ReconcileQueue {
    pub fn new(reconciler: Arc<Reconciler>, config: QueueConfig, ops: SharedOps) -> Self {
        info!(
            "ReconcileQueue initialized: batch={}, delay={}ms, max_pending={}",
            config.batch_limit, config.inter_item_delay_ms, config.max_pending
        );
        Self {
            inner: Mutex::new(QueueInner::default()),
            reconciler,
            config,
            counters: Counters::default(),
            ops,
        }
    }

    // ---------------------------------------------------------------
    // Producers
    // ---------------------------------------------------------------

    /// Queue `id` for reconciliation. Idempotent while pending.
    pub fn enqueue(&self, id: &str) -> EnqueueResult {
        let mut inner = self.inner.lock();
        if inner.pending.contains(id) {
            return EnqueueResult::Duplicate;
        }
        if inner.pending.len() >= self.config.max_pending {
            drop(inner);
            self.counters.rejected_full.fetch_add(1, Ordering::Relaxed);
            warn!("Reconcile queue full, refusing {}", id);
            return EnqueueResult::Full;
        }
        inner.pending.insert(id.to_string());
        inner.order.push_back(id.to_string());
        EnqueueResult::Queued
    }

    /// Put an id back after a failed attempt. Not subject to the cap.
    fn requeue(&self, id: &str) {
        let mut inner = self.inner.lock();
        if inner.pending.insert(id.to_string()) {
            inner.order.push_back(id.to_string());
        }
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.lock().pending.contains(id)
    }

    /// Pop up to `batch_limit` ids, removing them from the pending set.
    fn take_batch(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        let n = self.config.batch_limit.min(inner.order.len());
        let batch: Vec<String> = inner.order.drain(..n).collect();
        for id in &batch {
            inner.pending.remove(id);
        }
        batch
    }

    // ---------------------------------------------------------------
    // Drain
    // ---------------------------------------------------------------

    /// Process one batch serially, pausing between items.
    pub async fn drain_once(&self) -> DrainReport {
        let batch = self.take_batch();
        let mut report = DrainReport {
            taken: batch.len(),
            ..DrainReport::default()
        };

        for (i, id) in batch.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_item_delay()).await;
            }

            let step = if self.reconciler.feed().is_available() {
                self.process(id, &mut report).await
            } else {
                Step::Defer
            };

            match step {
                Step::Done => {
                    self.inner.lock().attempts.remove(id);
                }
                Step::Retry => self.retry(id, &mut report),
                Step::Defer => {
                    // Nothing below would reach the provider either.
                    for rest in &batch[i..] {
                        self.requeue(rest);
                    }
                    report.deferred = batch.len() - i;
                    debug!("Circuit open, deferred {} queued ids", report.deferred);
                    self.ops.emit(
                        OpsEvent::new(COMPONENT, "drain_deferred", OpsLevel::Info)
                            .with("deferred", report.deferred),
                    );
                    break;
                }
            }
        }
        report
    }

    async fn process(&self, id: &str, report: &mut DrainReport) -> Step {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        match self.reconciler.reconcile(id).await {
            Ok(ReconcileResult::NoData) => {
                report.no_data += 1;
                Step::Done
            }
            Ok(ReconcileResult::Submitted(outcome)) if outcome.is_retryable() => Step::Retry,
            Ok(ReconcileResult::Submitted(_)) => {
                report.succeeded += 1;
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                Step::Done
            }
            Err(e) if e.is_circuit_open() => Step::Defer,
            Err(e) if e.is_retryable() => Step::Retry,
            Err(e) => {
                warn!("Reconcile of {} failed permanently: {}", id, e);
                report.dropped += 1;
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Step::Done
            }
        }
    }

    fn retry(&self, id: &str, report: &mut DrainReport) {
        let attempts = {
            let mut inner = self.inner.lock();
            let attempts = inner.attempts.entry(id.to_string()).or_insert(0);
            *attempts += 1;
            *attempts
        };

        if attempts >= self.config.max_attempts {
            self.inner.lock().attempts.remove(id);
            report.dropped += 1;
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping {} after {} reconcile attempts", id, attempts);
            self.ops.emit(
                OpsEvent::new(COMPONENT, "dropped", OpsLevel::Warn)
                    .with("id", id)
                    .with("attempts", attempts),
            );
            return;
        }

        report.retried += 1;
        self.counters.retried.fetch_add(1, Ordering::Relaxed);
        self.requeue(id);
    }

    /// Spawn the drain loop on the configured cadence.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Reconcile queue drain started (every {}ms)",
                self.config.drain_interval_ms
            );
            let mut ticker = tokio::time::interval(self.config.drain_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.depth() == 0 {
                    continue;
                }
                let report = self.drain_once().await;
                debug!("Drain pass: {:?}", report);
            }
        })
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.depth(),
            max_pending: self.config.max_pending,
            processed: self.counters.processed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected_full: self.counters.rejected_full.load(Ordering::Relaxed),
        }
    }
}
