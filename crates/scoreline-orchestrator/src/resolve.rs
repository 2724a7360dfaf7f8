//! Field-level conflict resolution.
//!
//! Pure: given a record with its shadow metadata and a batch of updates,
//! decide what to persist. Each update is judged independently against the
//! state left by the updates before it, so several updates to one field in a
//! single batch resolve exactly as if they had arrived in separate calls.
//!
//! Precedence is lexicographic on `(priority, timestamp)`:
//!
//! * strictly higher priority wins, whatever the timestamps;
//! * equal priority falls back to the timestamp, and an equal timestamp
//!   applies (the later arrival wins the tie);
//! * a forward lifecycle transition of `status` applies even when it lost the
//!   comparison. The stored version is then kept, so the late transition
//!   cannot lower the bar for later writers.
//!
//! Independently of versions, kickoff timestamps are write-once and `status`
//! never moves backwards along the lifecycle, not even by way of
//! `INTERRUPTED`.

use std::collections::{BTreeMap, HashMap};

use scoreline_core::{
    EventRecord, EventStatus, Field, FieldUpdate, FieldValue, FieldVersion, SkipReason,
    SkippedField,
};
use scoreline_store::{RecordPatch, VersionedRecord};

/// What one batch resolves to.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Entries to persist, including version-only entries for unchanged values.
    pub patch: RecordPatch,
    /// Fields whose value differs from the stored record.
    pub updated: Vec<Field>,
    pub skipped: Vec<SkippedField>,
    /// Updates that passed validation.
    pub valid: usize,
    /// Record state after the patch.
    pub record: Option<EventRecord>,
}

impl Resolution {
    /// At least one field won its comparison.
    pub fn has_winners(&self) -> bool {
        !self.patch.is_empty()
    }
}

/// Resolve `updates` against `current`.
pub fn resolve(current: &VersionedRecord, updates: &[FieldUpdate]) -> Resolution {
    let mut working = current.record.clone();
    let mut versions: HashMap<Field, FieldVersion> = current.versions.clone();
    let mut staged: BTreeMap<Field, (FieldValue, FieldVersion)> = BTreeMap::new();
    let mut skipped = Vec::new();
    let mut valid = 0usize;

    for update in updates {
        let field = update.field();
        let skip = |reason| SkippedField { field, reason };

        if update.value.validate().is_err() {
            skipped.push(skip(SkipReason::Invalid));
            continue;
        }
        valid += 1;

        if field.is_write_once() && working.is_set(field) {
            skipped.push(skip(SkipReason::WriteOnce));
            continue;
        }

        let incoming = update.version();
        let wins = versions
            .get(&field)
            .map_or(true, |stored| incoming.beats_or_ties(stored));

        let mut forward = false;
        if let FieldValue::Status(to) = update.value {
            let from = working.status;
            if working.is_regression_to(to) {
                skipped.push(skip(SkipReason::Regression));
                continue;
            }
            forward = EventStatus::is_forward_transition(from, to);
        }

        if !wins && !forward {
            skipped.push(skip(SkipReason::Stale));
            continue;
        }

        let version = if wins {
            incoming
        } else {
            // Forward transition that lost on version: keep the higher one.
            versions.get(&field).cloned().unwrap_or(incoming)
        };

        if working.holds(&update.value) {
            skipped.push(skip(SkipReason::Unchanged));
        } else {
            working.apply(&update.value);
        }
        versions.insert(field, version.clone());
        staged.insert(field, (update.value.clone(), version));
    }

    let mut patch = RecordPatch::default();
    let mut updated = Vec::new();
    for (field, (value, version)) in staged {
        let changed = !current.record.holds(&value);
        if changed {
            updated.push(field);
        }
        patch.push(value, version, changed);
    }

    Resolution {
        patch,
        updated,
        skipped,
        valid,
        record: Some(working),
    }
}
