//! Reconcile one record: fetch fresh live fields, submit them as updates.

use std::sync::Arc;

use scoreline_core::{now_secs, priority, OpsEvent, OpsLevel, Result, SharedOps, UpdateOutcome};
use scoreline_orchestrator::WriteOrchestrator;
use scoreline_upstream::LiveFeed;
use tracing::debug;

const COMPONENT: &str = "reconcile";

/// Source tag for queue drains and recovery.
pub const RECONCILE_SOURCE: &str = "reconcile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileResult {
    /// The provider had nothing usable for this id.
    NoData,
    /// Fresh fields were submitted; the orchestrator's verdict.
    Submitted(UpdateOutcome),
}

impl ReconcileResult {
    /// Whether the record actually changed.
    pub fn changed(&self) -> bool {
        matches!(self, ReconcileResult::Submitted(outcome) if outcome.changed())
    }
}

pub struct Reconciler {
    feed: Arc<dyn LiveFeed>,
    orchestrator: Arc<WriteOrchestrator>,
    ops: SharedOps,
}

impl Reconciler {
    pub fn new(feed: Arc<dyn LiveFeed>, orchestrator: Arc<WriteOrchestrator>, ops: SharedOps) -> Self {
        Self {
            feed,
            orchestrator,
            ops,
        }
    }

    pub fn feed(&self) -> &Arc<dyn LiveFeed> {
        &self.feed
    }

    pub fn orchestrator(&self) -> &Arc<WriteOrchestrator> {
        &self.orchestrator
    }

    /// Reconcile at reconcile priority.
    pub async fn reconcile(&self, id: &str) -> Result<ReconcileResult> {
        self.reconcile_as(id, RECONCILE_SOURCE, priority::RECONCILE)
            .await
    }

    /// Reconcile, tagging the submitted updates with `source` and `priority`.
    ///
    /// Provider failures (including "circuit open") come back as errors;
    /// everything the orchestrator decides is in the `Submitted` outcome.
    pub async fn reconcile_as(
        &self,
        id: &str,
        source: &str,
        priority: u32,
    ) -> Result<ReconcileResult> {
        self.ops.emit(
            OpsEvent::new(COMPONENT, "reconcile_requested", OpsLevel::Debug)
                .with("id", id)
                .with("source", source),
        );

        let fields = match self.feed.fetch_live(id).await {
            Ok(Some(fields)) => fields,
            Ok(None) => {
                self.emit_result(id, source, "no_data", None);
                return Ok(ReconcileResult::NoData);
            }
            Err(e) => {
                let kind = if e.is_circuit_open() {
                    "circuit_open"
                } else {
                    "provider_error"
                };
                self.emit_result(id, source, kind, Some(&e.to_string()));
                return Err(e);
            }
        };

        let updates = fields.into_updates(source, priority, now_secs());
        let outcome = self.orchestrator.submit(id, updates, source).await;
        debug!(
            "Reconciled {}: {:?} ({} fields)",
            id,
            outcome.status,
            outcome.fields_updated.len()
        );
        self.ops.emit(
            OpsEvent::new(COMPONENT, "reconcile_result", OpsLevel::Info)
                .with("id", id)
                .with("source", source)
                .with("result", outcome.status)
                .with("fields_updated", &outcome.fields_updated),
        );
        Ok(ReconcileResult::Submitted(outcome))
    }

    fn emit_result(&self, id: &str, source: &str, result: &str, error: Option<&str>) {
        let level = if error.is_some() {
            OpsLevel::Warn
        } else {
            OpsLevel::Info
        };
        let mut event = OpsEvent::new(COMPONENT, "reconcile_result", level)
            .with("id", id)
            .with("source", source)
            .with("result", result);
        if let Some(error) = error {
            event = event.with("error", error);
        }
        self.ops.emit(event);
    }
}
