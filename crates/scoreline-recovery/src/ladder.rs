//! The recovery ladder: what to do with each stale candidate, once per tick.
//!
//! Steps, in order, for every deduplicated candidate:
//!
//! 1. log the detection with reason and age;
//! 2. inside the per-id cooldown: log and stop;
//! 3. otherwise reconcile, restarting the cooldown;
//! 4. circuit open: log and stop (not a recovery failure);
//! 5. record changed: recovered;
//! 6. no usable data past the auto-terminate age: force to ENDED;
//! 7. anything else, including data that changed nothing: mark unresolved
//!    for operators.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use scoreline_core::{
    now_secs, OpsEvent, OpsLevel, OutcomeStatus, Result, SharedOps, StaleCandidate,
};
use scoreline_orchestrator::WriteOrchestrator;
use scoreline_runtime::{ReconcileResult, Reconciler};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::detector::StalenessDetector;

const COMPONENT: &str = "recovery";

/// Where a candidate's walk down the ladder stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderAction {
    SkippedCooldown,
    SkippedCircuitOpen,
    /// Another writer held the record lock.
    Deferred,
    Recovered,
    /// Reached the last resort: status forced to ENDED.
    ForceTerminated,
    Unresolved,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub at: i64,
    pub detected: usize,
    pub reconciled: usize,
    pub recovered: usize,
    pub skipped_cooldown: usize,
    pub skipped_circuit: usize,
    pub deferred_locked: usize,
    pub force_terminated: usize,
    pub unresolved: usize,
}

impl TickReport {
    fn record(&mut self, action: LadderAction) {
        match action {
            LadderAction::SkippedCooldown => self.skipped_cooldown += 1,
            LadderAction::SkippedCircuitOpen => self.skipped_circuit += 1,
            LadderAction::Deferred => self.deferred_locked += 1,
            LadderAction::Recovered => self.recovered += 1,
            LadderAction::ForceTerminated => self.force_terminated += 1,
            LadderAction::Unresolved => self.unresolved += 1,
        }
    }
}

pub struct RecoveryLadder {
    detector: StalenessDetector,
    reconciler: Arc<Reconciler>,
    /// id → epoch seconds of the last reconcile attempt.
    cooldowns: DashMap<String, i64>,
    last_report: Mutex<Option<TickReport>>,
    ops: SharedOps,
}

impl RecoveryLadder {
    pub fn new(detector: StalenessDetector, reconciler: Arc<Reconciler>, ops: SharedOps) -> Self {
        let config = detector.config();
        info!(
            "RecoveryLadder initialized: cooldown={}s, auto_terminate={}s",
            config.cooldown_secs, config.auto_terminate_secs
        );
        Self {
            detector,
            reconciler,
            cooldowns: DashMap::new(),
            last_report: Mutex::new(None),
            ops,
        }
    }

    fn orchestrator(&self) -> &Arc<WriteOrchestrator> {
        self.reconciler.orchestrator()
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(now_secs()).await
    }

    /// Run one detection pass and walk every candidate down the ladder.
    pub async fn tick_at(&self, now: i64) -> Result<TickReport> {
        let config = self.detector.config();
        let retention = config.cooldown_retention_secs;
        self.cooldowns.retain(|_, last| now - *last <= retention);

        let candidates = self.detector.scan(now).await?;
        let mut seen = HashSet::new();
        let mut report = TickReport {
            at: now,
            ..TickReport::default()
        };

        for candidate in &candidates {
            if !seen.insert(candidate.id.as_str()) {
                continue;
            }
            report.detected += 1;
            let action = self.climb(candidate, now, &mut report).await;
            report.record(action);
        }

        if report.detected > 0 {
            debug!("Recovery tick: {:?}", report);
        }
        *self.last_report.lock() = Some(report.clone());
        Ok(report)
    }

    async fn climb(&self, c: &StaleCandidate, now: i64, report: &mut TickReport) -> LadderAction {
        let config = self.detector.config();

        self.emit(c, "stale_detected", OpsLevel::Info);

        if let Some(last) = self.cooldowns.get(&c.id).map(|e| *e.value()) {
            if now - last < config.cooldown_secs {
                self.emit(c, "skipped_cooldown", OpsLevel::Debug);
                return LadderAction::SkippedCooldown;
            }
        }
        self.cooldowns.insert(c.id.clone(), now);
        report.reconciled += 1;

        let result = match self.reconciler.reconcile(&c.id).await {
            Ok(result) => result,
            Err(e) if e.is_circuit_open() => {
                // No attempt reached the provider; try again next tick.
                self.cooldowns.remove(&c.id);
                self.emit(c, "skipped_circuit_open", OpsLevel::Info);
                return LadderAction::SkippedCircuitOpen;
            }
            Err(e) => {
                warn!("Recovery reconcile of {} failed: {}", c.id, e);
                self.ops.emit(
                    self.event(c, "marked_unresolved", OpsLevel::Warn)
                        .with("error", e.to_string()),
                );
                return LadderAction::Unresolved;
            }
        };

        let outcome = match result {
            ReconcileResult::NoData => {
                if c.age_seconds > config.auto_terminate_secs {
                    return self.terminate(c).await;
                }
                self.emit(c, "marked_unresolved", OpsLevel::Warn);
                return LadderAction::Unresolved;
            }
            ReconcileResult::Submitted(outcome) => outcome,
        };

        match outcome.status {
            OutcomeStatus::RejectedLocked => {
                self.emit(c, "reconcile_deferred", OpsLevel::Info);
                LadderAction::Deferred
            }
            // Someone else ended it in the meantime.
            OutcomeStatus::RejectedImmutable => LadderAction::Recovered,
            _ if outcome.changed() => {
                self.ops.emit(
                    self.event(c, "recovered", OpsLevel::Info)
                        .with("fields_updated", &outcome.fields_updated),
                );
                LadderAction::Recovered
            }
            // Data arrived but changed nothing.
            _ => {
                let mut event = self
                    .event(c, "marked_unresolved", OpsLevel::Warn)
                    .with("outcome", outcome.status);
                if let Some(error) = &outcome.error {
                    event = event.with("error", error);
                }
                self.ops.emit(event);
                LadderAction::Unresolved
            }
        }
    }

    async fn terminate(&self, c: &StaleCandidate) -> LadderAction {
        let outcome = self
            .orchestrator()
            .submit_force_terminate(&c.id, c.reason.as_str())
            .await;
        match outcome.status {
            OutcomeStatus::Success => {
                self.emit(c, "recovery_exhausted", OpsLevel::Critical);
                LadderAction::ForceTerminated
            }
            OutcomeStatus::RejectedLocked => {
                self.emit(c, "reconcile_deferred", OpsLevel::Info);
                LadderAction::Deferred
            }
            OutcomeStatus::RejectedImmutable => LadderAction::Recovered,
            _ => {
                self.ops.emit(
                    self.event(c, "marked_unresolved", OpsLevel::Warn)
                        .with("error", outcome.error.unwrap_or_default()),
                );
                LadderAction::Unresolved
            }
        }
    }

    fn event(&self, c: &StaleCandidate, name: &'static str, level: OpsLevel) -> OpsEvent {
        OpsEvent::new(COMPONENT, name, level)
            .with("id", &c.id)
            .with("reason", c.reason.as_str())
            .with("status", c.status)
            .with("minute", c.minute)
            .with("age_seconds", c.age_seconds)
            .with("threshold_seconds", c.threshold_seconds)
    }

    fn emit(&self, c: &StaleCandidate, name: &'static str, level: OpsLevel) {
        self.ops.emit(self.event(c, name, level));
    }

    /// Report of the most recent tick, if any.
    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report.lock().clone()
    }

    /// Ids currently inside their cooldown bookkeeping.
    pub fn cooldown_len(&self) -> usize {
        self.cooldowns.len()
    }
}
