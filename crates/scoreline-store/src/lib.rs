//! Scoreline Store: SQLite event records, shadow metadata and record locks.

pub mod lock;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use lock::RecordLock;
pub use sqlite::SqliteStore;
pub use types::*;
