//! Database schema SQL.

/// One row per upstream event, keyed by the provider's external id.
pub const EVENTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    external_id TEXT PRIMARY KEY,
    scheduled_time INTEGER,
    status TEXT NOT NULL DEFAULT 'NOT_STARTED',
    score_home INTEGER,
    score_away INTEGER,
    display_score_home INTEGER,
    display_score_away INTEGER,
    phase1_kickoff INTEGER,
    phase2_kickoff INTEGER,
    extra_kickoff INTEGER,
    minute INTEGER,
    minute_updated_at INTEGER,
    last_event_ts INTEGER,
    provider_update_time INTEGER,
    incidents TEXT,
    statistics TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);
CREATE INDEX IF NOT EXISTS idx_events_scheduled ON events(scheduled_time);
"#;

/// Last applied `(priority, timestamp)` per field, used for conflict resolution.
pub const FIELD_VERSIONS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS field_versions (
    external_id TEXT NOT NULL REFERENCES events(external_id) ON DELETE CASCADE,
    field TEXT NOT NULL,
    priority INTEGER NOT NULL,
    ts INTEGER NOT NULL,
    source TEXT NOT NULL,
    PRIMARY KEY (external_id, field)
);
"#;

/// Name-scoped advisory locks shared by every process using the database file.
pub const LOCKS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS record_locks (
    name TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;
