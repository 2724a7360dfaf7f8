//! RAII guard for a storage-backed, name-scoped record lock.

use tracing::warn;

use crate::sqlite::SqliteStore;

/// Held lock on one name. Released on drop unless already released.
///
/// The lock row lives in the database, so it excludes writers in other
/// processes sharing the same file, not just other tasks in this one.
pub struct RecordLock<'a> {
    store: &'a SqliteStore,
    name: String,
    owner: String,
    released: bool,
}

impl<'a> RecordLock<'a> {
    pub(crate) fn new(store: &'a SqliteStore, name: String, owner: String) -> Self {
        Self {
            store,
            name,
            owner,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique token identifying this acquisition.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release explicitly, surfacing any storage error.
    pub fn release(mut self) -> scoreline_core::Result<()> {
        self.released = true;
        self.store.release_lock(&self.name, &self.owner).map(|_| ())
    }
}

impl Drop for RecordLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.release_lock(&self.name, &self.owner) {
            // The row expires on its own after the TTL.
            warn!("Failed to release lock {}: {}", self.name, e);
        }
    }
}
