//! Staleness detection.
//!
//! Each status belongs to exactly one bucket with its own threshold:
//!
//! | bucket | statuses | age measured from |
//! |---|---|---|
//! | `stale` | PHASE_1, EXTRA_TIME, SHOOTOUT | latest freshness marker |
//! | `intermission_stuck` | INTERMISSION | latest freshness marker |
//! | `second_phase_no_progress` | PHASE_2 | last minute change |
//! | `interrupted_stuck` | INTERRUPTED | latest freshness marker |
//! | `should_be_active` | NOT_STARTED, DELAYED | scheduled time |
//!
//! Records with no freshness marker fall back to their latest kickoff, then
//! to the scheduled time. A record with none of these is never flagged.

use std::sync::Arc;

use scoreline_core::{
    DetectorConfig, Error, EventRecord, EventStatus, Result, StaleCandidate, StaleReason,
};
use scoreline_store::SqliteStore;

fn last_activity(record: &EventRecord) -> Option<i64> {
    let k = &record.kickoffs;
    let kickoff = [k.phase1, k.phase2, k.extra].into_iter().flatten().max();
    record
        .freshness()
        .or(kickoff)
        .or(record.scheduled_time)
}

/// Decide whether `record` is stale at `now`.
pub fn classify(record: &EventRecord, now: i64, config: &DetectorConfig) -> Option<StaleCandidate> {
    let (reason, since, threshold) = match record.status {
        EventStatus::Phase1 | EventStatus::ExtraTime | EventStatus::Shootout => {
            (StaleReason::Stale, last_activity(record)?, config.live_idle_secs)
        }
        EventStatus::Intermission => (
            StaleReason::IntermissionStuck,
            last_activity(record)?,
            config.intermission_secs,
        ),
        EventStatus::Phase2 => (
            StaleReason::SecondPhaseNoProgress,
            record.minute_updated_at.or_else(|| last_activity(record))?,
            config.second_phase_no_progress_secs,
        ),
        EventStatus::Interrupted => (
            StaleReason::InterruptedStuck,
            last_activity(record)?,
            config.interrupted_secs,
        ),
        EventStatus::NotStarted | EventStatus::Delayed => (
            StaleReason::ShouldBeActive,
            record.scheduled_time?,
            config.should_be_active_grace_secs,
        ),
        EventStatus::Ended => return None,
    };

    let age = now - since;
    if age <= threshold {
        return None;
    }
    Some(StaleCandidate {
        id: record.external_id.clone(),
        status: record.status,
        minute: record.minute,
        last_event_ts: record.last_event_ts,
        provider_update_time: record.provider_update_time,
        reason,
        age_seconds: age,
        threshold_seconds: threshold,
    })
}

pub struct StalenessDetector {
    store: Arc<SqliteStore>,
    config: DetectorConfig,
}

impl StalenessDetector {
    pub fn new(store: Arc<SqliteStore>, config: DetectorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// All stale candidates at `now`, live records first.
    pub fn scan_at(&self, now: i64) -> Result<Vec<StaleCandidate>> {
        scan_store(&self.store, now, &self.config)
    }

    /// [`scan_at`](Self::scan_at) on the blocking pool.
    pub async fn scan(&self, now: i64) -> Result<Vec<StaleCandidate>> {
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || scan_store(&store, now, &config))
            .await
            .map_err(|e| Error::Internal(format!("staleness scan failed: {}", e)))?
    }
}

/// Pre-match records are only considered within the lookback window so
/// abandoned fixtures from long ago are not rescanned forever.
fn scan_store(store: &SqliteStore, now: i64, config: &DetectorConfig) -> Result<Vec<StaleCandidate>> {
    let mut candidates: Vec<StaleCandidate> = store
        .records_with_status(&EventStatus::LIVE)?
        .iter()
        .filter_map(|r| classify(r, now, config))
        .collect();

    let overdue = store.pre_match_scheduled_between(
        now - config.lookback_secs,
        now - config.should_be_active_grace_secs,
    )?;
    candidates.extend(overdue.iter().filter_map(|r| classify(r, now, config)));
    Ok(candidates)
}
