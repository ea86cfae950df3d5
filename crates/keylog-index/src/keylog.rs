//! Thread-safe wrapper around a single keylog.

use std::sync::{Arc, Mutex, RwLock, Weak};

use keylog_store::{encode, KvBackend};
use keylog_types::{ChainError, EntryId, KeylogIndexState, LogKey};
use tracing::debug;

use crate::error::{IndexError, IndexResult};
use crate::registry::OpenIndexes;

/// A keylog shared by every caller that currently holds it open.
///
/// All reads and mutations go through one read/write lock, so operations on
/// a single index are linearized. Durable writes happen only in [`flush`],
/// which the registry calls when the last holder closes the index.
///
/// [`flush`]: KeylogIndex::flush
pub struct KeylogIndex {
    key: LogKey,
    state: RwLock<KeylogIndexState>,
    /// Serializes flushes of this index so they land in order.
    flush_lock: Mutex<()>,
    backend: Arc<dyn KvBackend>,
    /// Empty for transient indexes that were never registered.
    registry: Weak<OpenIndexes>,
}

impl KeylogIndex {
    pub(crate) fn new(
        state: KeylogIndexState,
        backend: Arc<dyn KvBackend>,
        registry: Weak<OpenIndexes>,
    ) -> Self {
        Self {
            key: state.key.clone(),
            state: RwLock::new(state),
            flush_lock: Mutex::new(()),
            backend,
            registry,
        }
    }

    /// Build an index that belongs to no registry.
    ///
    /// Reads and mutations work as usual, `flush` still writes through to
    /// `backend`, but `close` reports `NotFound`.
    pub fn transient(state: KeylogIndexState, backend: Arc<dyn KvBackend>) -> Self {
        Self::new(state, backend, Weak::new())
    }

    /// The key this index belongs to.
    pub fn key(&self) -> &[u8] {
        self.key.as_bytes()
    }

    /// The key this index belongs to, as a [`LogKey`].
    pub fn log_key(&self) -> &LogKey {
        &self.key
    }

    /// Current marker. Empty until one is set.
    pub fn marker(&self) -> Vec<u8> {
        self.read().marker.clone()
    }

    pub fn height(&self) -> u32 {
        self.read().height()
    }

    /// The most recent entry id, if the chain is non-empty.
    pub fn last(&self) -> Option<EntryId> {
        self.read().last()
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.read().contains(id)
    }

    pub fn count(&self) -> usize {
        self.read().count()
    }

    /// Replace the marker. Returns `false` if it already had this value.
    pub fn set_marker(&self, marker: &[u8]) -> bool {
        self.write().set_marker(marker)
    }

    /// Append `id`, which must link to the current last entry through `prev`.
    ///
    /// `prev` is the zero id for the first entry of a chain.
    pub fn append(&self, id: EntryId, prev: EntryId) -> IndexResult<()> {
        self.write().append(id, prev)?;
        Ok(())
    }

    /// Drop the last entry id. Returns the new height and whether anything
    /// was removed.
    pub fn rollback(&self) -> (u32, bool) {
        self.write().rollback()
    }

    /// Visit entry ids oldest first, starting at `seek` (inclusive).
    ///
    /// The read lock is held for the whole traversal, so `visit` must not
    /// mutate this index.
    pub fn iter<E, F>(&self, seek: Option<&EntryId>, visit: F) -> Result<(), E>
    where
        F: FnMut(&EntryId) -> Result<(), E>,
        E: From<ChainError>,
    {
        self.read().iter(seek, visit)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> KeylogIndexState {
        self.read().clone()
    }

    /// Write the current state to the backend under this index's key.
    ///
    /// The state lock is held only while serializing.
    pub fn flush(&self) -> IndexResult<()> {
        let _order = self.flush_lock.lock().expect("lock poisoned");
        let (bytes, height) = {
            let state = self.read();
            (encode(&*state)?, state.height())
        };
        self.backend.put(self.key.as_bytes(), &bytes)?;
        debug!(key = %self.key, height, "keylog flushed");
        Ok(())
    }

    /// Release this caller's reference.
    ///
    /// The last close flushes the index and evicts it from the registry.
    pub fn close(&self) -> IndexResult<()> {
        match self.registry.upgrade() {
            Some(registry) => registry.release(self.key.as_bytes(), Some(self)),
            None => Err(IndexError::NotFound(self.key.clone())),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, KeylogIndexState> {
        self.state.read().expect("lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, KeylogIndexState> {
        self.state.write().expect("lock poisoned")
    }
}

impl std::fmt::Debug for KeylogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("KeylogIndex")
            .field("key", &self.key)
            .field("height", &state.height())
            .field("marker_len", &state.marker.len())
            .finish()
    }
}
