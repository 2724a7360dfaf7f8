//! Store-level data types.

use std::collections::{BTreeMap, HashMap};

use scoreline_core::{EventRecord, Field, FieldValue, FieldVersion};
use serde::Serialize;

/// A record together with its per-field shadow metadata.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    pub record: EventRecord,
    pub versions: HashMap<Field, FieldVersion>,
}

/// One field write inside a patch.
#[derive(Debug, Clone)]
pub struct PatchEntry {
    pub value: FieldValue,
    pub version: FieldVersion,
    /// False when only the shadow metadata moves (value already current).
    pub changed: bool,
}

/// Everything one orchestrator call persists, written in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub entries: Vec<PatchEntry>,
}

impl RecordPatch {
    pub fn push(&mut self, value: FieldValue, version: FieldVersion, changed: bool) {
        self.entries.push(PatchEntry {
            value,
            version,
            changed,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn changed_fields(&self) -> Vec<Field> {
        self.entries
            .iter()
            .filter(|e| e.changed)
            .map(|e| e.value.field())
            .collect()
    }
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_records: i64,
    pub by_status: BTreeMap<String, i64>,
    pub active_locks: i64,
    pub db_path: String,
}
