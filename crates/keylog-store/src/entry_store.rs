//! Content-addressed store of immutable log entries.

use std::path::Path;
use std::sync::Arc;

use keylog_types::{EntryId, LogEntry};
use tracing::debug;

use crate::codec::{decode, encode};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::log::LogBackend;
use crate::traits::KvBackend;

/// Maps an entry id to its serialized entry.
///
/// The store does not compute ids: callers hash entries with their own
/// `EntryHasher` and pass the id in. Stateless beyond the backend handle.
pub struct EntryStore {
    backend: Arc<dyn KvBackend>,
}

impl EntryStore {
    /// Open (or create) a file-backed entry store in `dir`.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let backend = LogBackend::open(dir.as_ref(), config)?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Wrap an already-open backend.
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Name of the underlying engine.
    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    /// Read the entry stored under `id`.
    pub fn get(&self, id: &EntryId) -> StoreResult<LogEntry> {
        let bytes = self
            .backend
            .get(id.as_bytes())?
            .ok_or(StoreError::NotFound(*id))?;
        decode(&bytes)
    }

    /// Store `entry` under `id`.
    pub fn set(&self, id: &EntryId, entry: &LogEntry) -> StoreResult<()> {
        let bytes = encode(entry)?;
        self.backend.put(id.as_bytes(), &bytes)?;
        debug!(id = %id.short_hex(), key = %entry.key, "entry stored");
        Ok(())
    }

    /// Remove the entry stored under `id`. Absent ids are not an error.
    pub fn delete(&self, id: &EntryId) -> StoreResult<()> {
        let existed = self.backend.delete(id.as_bytes())?;
        debug!(id = %id.short_hex(), existed, "entry deleted");
        Ok(())
    }

    /// Check whether an entry is stored under `id`.
    pub fn contains(&self, id: &EntryId) -> StoreResult<bool> {
        self.backend.contains(id.as_bytes())
    }

    /// Approximate number of stored entries.
    pub fn count(&self) -> i64 {
        self.backend.approx_count()
    }

    /// Close the underlying backend. The store is unusable afterwards.
    pub fn close(&self) -> StoreResult<()> {
        self.backend.close()
    }
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}
