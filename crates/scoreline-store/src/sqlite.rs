//! SQLite-backed event record store.
//!
//! The write orchestrator is the only caller that mutates live fields; this
//! layer just persists what it is handed, atomically.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::lock::RecordLock;
use crate::schema::{EVENTS_SQL, FIELD_VERSIONS_SQL, LOCKS_SQL};
use crate::types::*;
use scoreline_core::{
    now_secs, Error, EventRecord, EventStatus, Field, FieldValue, FieldVersion, PhaseKickoffs,
    Result,
};

const RECORD_COLUMNS: &str = "external_id, scheduled_time, status, score_home, score_away, \
     display_score_home, display_score_away, phase1_kickoff, phase2_kickoff, extra_kickoff, \
     minute, minute_updated_at, last_event_ts, provider_update_time, incidents, statistics, \
     updated_at";

fn db(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// SQLite store for event records.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create the store at `db_path`, creating parent directories.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Database(e.to_string()))?;
        }

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        info!(
            "SqliteStore initialized: {} records, path={}",
            store.count_records()?,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db)?;
        // Other processes may hold the write lock briefly.
        conn.busy_timeout(Duration::from_secs(5)).map_err(db)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!("{}\n{}\n{}", EVENTS_SQL, FIELD_VERSIONS_SQL, LOCKS_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Schedule ingestion
    // ---------------------------------------------------------------

    /// Create a record in NOT_STARTED, or fill in a missing scheduled time.
    ///
    /// `scheduled_time` is write-once: an existing value is never replaced.
    /// Returns true if a new record was created.
    pub fn upsert_schedule(&self, external_id: &str, scheduled_time: i64) -> Result<bool> {
        let now = now_secs();
        let conn = self.conn.lock();
        let inserted = conn
            .prepare_cached(
                "INSERT OR IGNORE INTO events (external_id, scheduled_time, status, created_at)
                 VALUES (?1, ?2, 'NOT_STARTED', ?3)",
            )
            .map_err(db)?
            .execute(params![external_id, scheduled_time, now])
            .map_err(db)?;
        if inserted == 0 {
            conn.prepare_cached(
                "UPDATE events SET scheduled_time = ?2
                 WHERE external_id = ?1 AND scheduled_time IS NULL",
            )
            .map_err(db)?
            .execute(params![external_id, scheduled_time])
            .map_err(db)?;
        }
        Ok(inserted > 0)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub fn exists(&self, external_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .prepare_cached("SELECT 1 FROM events WHERE external_id = ?1")
            .map_err(db)?
            .query_row(params![external_id], |row| row.get(0))
            .optional()
            .map_err(db)?;
        Ok(found.is_some())
    }

    /// Get a record by external id.
    pub fn get(&self, external_id: &str) -> Result<Option<EventRecord>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM events WHERE external_id = ?1", RECORD_COLUMNS);
        let record = conn
            .prepare_cached(&sql)
            .map_err(db)?
            .query_row(params![external_id], Self::row_to_record)
            .optional()
            .map_err(db)?;
        Ok(record)
    }

    /// Load a record with its shadow metadata.
    pub fn load_versioned(&self, external_id: &str) -> Result<Option<VersionedRecord>> {
        let Some(record) = self.get(external_id)? else {
            return Ok(None);
        };

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT field, priority, ts, source FROM field_versions WHERE external_id = ?1",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map(params![external_id], |row| {
                let field: String = row.get(0)?;
                let priority: i64 = row.get(1)?;
                Ok((
                    field,
                    FieldVersion {
                        priority: u32::try_from(priority).unwrap_or(u32::MAX),
                        timestamp: row.get(2)?,
                        source: row.get(3)?,
                    },
                ))
            })
            .map_err(db)?;

        let mut versions = HashMap::new();
        for row in rows {
            let (name, version) = row.map_err(db)?;
            match Field::parse(&name) {
                Some(field) => {
                    versions.insert(field, version);
                }
                None => debug!("Ignoring unknown shadow field {} on {}", name, external_id),
            }
        }

        Ok(Some(VersionedRecord { record, versions }))
    }

    /// Records currently in any of `statuses`.
    pub fn records_with_status(&self, statuses: &[EventStatus]) -> Result<Vec<EventRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM events WHERE status IN ({}) ORDER BY external_id",
            RECORD_COLUMNS, placeholders
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db)?;
        let rows = stmt
            .query_map(
                params_from_iter(statuses.iter().map(|s| s.as_str())),
                Self::row_to_record,
            )
            .map_err(db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    }

    /// External ids currently in any of `statuses`.
    pub fn ids_with_status(&self, statuses: &[EventStatus]) -> Result<Vec<String>> {
        Ok(self
            .records_with_status(statuses)?
            .into_iter()
            .map(|r| r.external_id)
            .collect())
    }

    /// Pre-match records whose scheduled time falls within `[from, to]`.
    pub fn pre_match_scheduled_between(&self, from: i64, to: i64) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {} FROM events
             WHERE status IN ('NOT_STARTED', 'DELAYED')
               AND scheduled_time IS NOT NULL
               AND scheduled_time BETWEEN ?1 AND ?2
             ORDER BY scheduled_time",
            RECORD_COLUMNS
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql).map_err(db)?;
        let rows = stmt
            .query_map(params![from, to], Self::row_to_record)
            .map_err(db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    }

    pub fn count_records(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(db)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let mut by_status = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare_cached("SELECT status, COUNT(*) FROM events GROUP BY status")
                .map_err(db)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(db)?;
            for row in rows {
                let (status, count) = row.map_err(db)?;
                by_status.insert(status, count);
            }
        }
        let active_locks: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM record_locks WHERE expires_at > ?1",
                params![now_secs()],
                |row| row.get(0),
            )
            .map_err(db)?;

        Ok(StoreStats {
            total_records: by_status.values().sum(),
            by_status,
            active_locks,
            db_path: self.db_path.display().to_string(),
        })
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Persist every entry of `patch` and its shadow metadata in one transaction.
    pub fn apply_patch(&self, external_id: &str, patch: &RecordPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let now = now_secs();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db)?;

        let mut any_changed = false;
        for entry in &patch.entries {
            let field = entry.value.field();
            if entry.changed {
                any_changed = true;
                // Column names come from the closed `Field` enum.
                let sql = format!(
                    "UPDATE events SET {} = ?1 WHERE external_id = ?2",
                    field.as_str()
                );
                let updated = tx
                    .execute(&sql, params![Self::to_sql_value(&entry.value), external_id])
                    .map_err(db)?;
                if updated == 0 {
                    return Err(Error::NotFound(external_id.to_string()));
                }
                if field == Field::Minute {
                    tx.execute(
                        "UPDATE events SET minute_updated_at = ?1 WHERE external_id = ?2",
                        params![now, external_id],
                    )
                    .map_err(db)?;
                }
            }
            tx.execute(
                "INSERT INTO field_versions (external_id, field, priority, ts, source)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(external_id, field) DO UPDATE SET
                    priority = excluded.priority, ts = excluded.ts, source = excluded.source",
                params![
                    external_id,
                    field.as_str(),
                    i64::from(entry.version.priority),
                    entry.version.timestamp,
                    entry.version.source
                ],
            )
            .map_err(db)?;
        }

        if any_changed {
            tx.execute(
                "UPDATE events SET updated_at = ?1 WHERE external_id = ?2",
                params![now, external_id],
            )
            .map_err(db)?;
        }

        tx.commit().map_err(db)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Record locks
    // ---------------------------------------------------------------

    /// Try once to take the name-scoped lock. Never waits.
    ///
    /// Expired locks (holder crashed or overran `ttl_secs`) are reclaimed.
    pub fn try_lock(&self, name: &str, ttl_secs: i64) -> Result<Option<RecordLock<'_>>> {
        let owner = uuid::Uuid::new_v4().to_string();
        let now = now_secs();

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;
        tx.execute(
            "DELETE FROM record_locks WHERE name = ?1 AND expires_at <= ?2",
            params![name, now],
        )
        .map_err(db)?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO record_locks (name, owner, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, owner, now, now + ttl_secs.max(1)],
            )
            .map_err(db)?;
        tx.commit().map_err(db)?;
        drop(conn);

        if inserted == 1 {
            Ok(Some(RecordLock::new(self, name.to_string(), owner)))
        } else {
            Ok(None)
        }
    }

    /// Release a lock, but only if `owner` still holds it.
    pub fn release_lock(&self, name: &str, owner: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn
            .prepare_cached("DELETE FROM record_locks WHERE name = ?1 AND owner = ?2")
            .map_err(db)?
            .execute(params![name, owner])
            .map_err(db)?;
        Ok(deleted > 0)
    }

    /// Current holder of a lock, if unexpired.
    pub fn lock_holder(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let owner = conn
            .prepare_cached("SELECT owner FROM record_locks WHERE name = ?1 AND expires_at > ?2")
            .map_err(db)?
            .query_row(params![name, now_secs()], |row| row.get(0))
            .optional()
            .map_err(db)?;
        Ok(owner)
    }

    // ---------------------------------------------------------------
    // Row mapping
    // ---------------------------------------------------------------

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<EventRecord> {
        let status_str: String = row.get(2)?;
        let status = EventStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown status {}", status_str).into(),
            )
        })?;
        let incidents: Option<String> = row.get(14)?;
        let statistics: Option<String> = row.get(15)?;

        Ok(EventRecord {
            external_id: row.get(0)?,
            scheduled_time: row.get(1)?,
            status,
            score_home: row.get(3)?,
            score_away: row.get(4)?,
            display_score_home: row.get(5)?,
            display_score_away: row.get(6)?,
            kickoffs: PhaseKickoffs {
                phase1: row.get(7)?,
                phase2: row.get(8)?,
                extra: row.get(9)?,
            },
            minute: row.get(10)?,
            minute_updated_at: row.get(11)?,
            last_event_ts: row.get(12)?,
            provider_update_time: row.get(13)?,
            incidents: incidents.and_then(|s| serde_json::from_str(&s).ok()),
            statistics: statistics.and_then(|s| serde_json::from_str(&s).ok()),
            updated_at: row.get(16)?,
        })
    }

    fn to_sql_value(value: &FieldValue) -> SqlValue {
        fn opt_int(v: Option<i32>) -> SqlValue {
            v.map_or(SqlValue::Null, |v| SqlValue::Integer(i64::from(v)))
        }
        match value {
            FieldValue::Status(s) => SqlValue::Text(s.as_str().to_string()),
            FieldValue::ScoreHome(v)
            | FieldValue::ScoreAway(v)
            | FieldValue::DisplayScoreHome(v)
            | FieldValue::DisplayScoreAway(v)
            | FieldValue::Minute(v) => opt_int(*v),
            FieldValue::Phase1Kickoff(ts)
            | FieldValue::Phase2Kickoff(ts)
            | FieldValue::ExtraKickoff(ts)
            | FieldValue::LastEventTs(ts)
            | FieldValue::ProviderUpdateTime(ts) => SqlValue::Integer(*ts),
            FieldValue::Incidents(v) | FieldValue::Statistics(v) => {
                SqlValue::Text(v.to_string())
            }
        }
    }
}
