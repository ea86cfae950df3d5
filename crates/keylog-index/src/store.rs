//! Durable store of keylog indexes.

use std::path::Path;
use std::sync::Arc;

use keylog_store::{decode, KvBackend, LogBackend, StoreConfig, StoreError};
use keylog_types::{KeylogIndexState, LogKey};
use tracing::{debug, error};

use crate::error::{IndexError, IndexResult};
use crate::keylog::KeylogIndex;
use crate::registry::{Acquired, OpenIndexes};

/// Creates, opens, marks, removes and iterates keylog indexes.
///
/// Indexes handed out by [`get_key`], [`new_key`] and [`mark_key`] are
/// shared with every other holder of the same key and must be released with
/// [`KeylogIndex::close`]. Changes reach the backend when the last holder
/// closes.
///
/// [`get_key`]: IndexStore::get_key
/// [`new_key`]: IndexStore::new_key
/// [`mark_key`]: IndexStore::mark_key
pub struct IndexStore {
    backend: Arc<dyn KvBackend>,
    registry: Arc<OpenIndexes>,
}

impl IndexStore {
    /// Open (or create) a file-backed index store in `dir`.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> IndexResult<Self> {
        let backend = LogBackend::open(dir.as_ref(), config)?;
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Wrap an already-open backend.
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        let registry = OpenIndexes::new(Arc::clone(&backend));
        Self { backend, registry }
    }

    /// Name of the underlying engine.
    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    /// The registry of indexes currently open in this store.
    pub fn registry(&self) -> &Arc<OpenIndexes> {
        &self.registry
    }

    /// Create an empty keylog for `key`.
    ///
    /// Fails with `AlreadyOpen` if the key is open and `AlreadyExists` if it
    /// has a durable record.
    pub fn new_key(&self, key: &[u8]) -> IndexResult<Arc<KeylogIndex>> {
        let claim = self.registry.claim(key)?;
        if self.backend.contains(key)? {
            return Err(IndexError::AlreadyExists(LogKey::from(key)));
        }
        debug!(key = %LogKey::from(key), "keylog created");
        Ok(claim.fulfil(KeylogIndexState::new(key)))
    }

    /// Open the keylog for `key`, sharing it if already open.
    pub fn get_key(&self, key: &[u8]) -> IndexResult<Arc<KeylogIndex>> {
        match self.registry.acquire(key) {
            Acquired::Open(index) => Ok(index),
            Acquired::Claimed(claim) => {
                let state = self
                    .load(key)?
                    .ok_or_else(|| IndexError::NotFound(LogKey::from(key)))?;
                Ok(claim.fulfil(state))
            }
        }
    }

    /// Set the marker of `key`, creating the keylog if it does not exist.
    ///
    /// The returned index carries a reference the caller must close.
    pub fn mark_key(&self, key: &[u8], marker: &[u8]) -> IndexResult<Arc<KeylogIndex>> {
        let index = match self.registry.acquire(key) {
            Acquired::Open(index) => index,
            Acquired::Claimed(claim) => {
                let state = self
                    .load(key)?
                    .unwrap_or_else(|| KeylogIndexState::new(key));
                claim.fulfil(state)
            }
        };
        if index.set_marker(marker) {
            debug!(key = %index.log_key(), "keylog marked");
        }
        Ok(index)
    }

    /// Open `key`, run `f` on it, then close it.
    ///
    /// The index is closed even if `f` fails. An error from `f` takes
    /// precedence over a close error.
    pub fn with_key<T, F>(&self, key: &[u8], f: F) -> IndexResult<T>
    where
        F: FnOnce(&KeylogIndex) -> IndexResult<T>,
    {
        let index = self.get_key(key)?;
        let result = f(&*index);
        let closed = index.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Delete the durable record of `key`.
    ///
    /// Fails with `StillOpen` while any holder has it open and `NotFound` if
    /// no record exists. Entries referenced by the chain are left alone.
    pub fn remove_key(&self, key: &[u8]) -> IndexResult<()> {
        let _claim = self.registry.claim_removal(key)?;
        if !self.backend.delete(key)? {
            return Err(IndexError::NotFound(LogKey::from(key)));
        }
        debug!(key = %LogKey::from(key), "keylog removed");
        Ok(())
    }

    /// Visit every stored keylog in backend key order.
    ///
    /// Open keys are passed as their live shared index, without taking a
    /// reference, so `visit` must not close it: that would release a
    /// reference some other holder owns. Others are decoded into a transient
    /// index for the call, whose `close` reports `NotFound`. Records that
    /// fail to decode are logged and skipped. Stops at the first error
    /// returned by `visit`.
    pub fn iter<E, F>(&self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&[u8], &KeylogIndex) -> Result<(), E>,
        E: From<IndexError>,
    {
        let records = self.backend.iter().map_err(IndexError::from)?;
        for (key, value) in records {
            if let Some(index) = self.registry.peek(&key) {
                visit(key.as_slice(), &*index)?;
                continue;
            }
            match self.decode_state(&key, &value) {
                Ok(state) => {
                    let index = KeylogIndex::transient(state, Arc::clone(&self.backend));
                    visit(key.as_slice(), &index)?;
                }
                Err(e) => {
                    error!(key = %LogKey::from(key.as_slice()), error = %e, "skipping undecodable keylog");
                }
            }
        }
        Ok(())
    }

    /// Approximate number of stored keylogs.
    pub fn count(&self) -> i64 {
        self.backend.approx_count()
    }

    /// Returns `true` if `key` is currently open.
    pub fn is_open(&self, key: &[u8]) -> bool {
        self.registry.is_open(key)
    }

    /// Flush and evict every open index, then close the backend.
    ///
    /// Returns the last flush error, if any.
    pub fn close(&self) -> IndexResult<()> {
        let flushed = self.registry.close_all();
        self.backend.close()?;
        flushed
    }

    fn load(&self, key: &[u8]) -> IndexResult<Option<KeylogIndexState>> {
        match self.backend.get(key)? {
            Some(bytes) => Ok(Some(self.decode_state(key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn decode_state(&self, key: &[u8], bytes: &[u8]) -> IndexResult<KeylogIndexState> {
        let state: KeylogIndexState = decode(bytes)?;
        if state.key.as_bytes() != key {
            return Err(StoreError::Decode(format!(
                "record under {} belongs to {}",
                LogKey::from(key),
                state.key
            ))
            .into());
        }
        Ok(state)
    }
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("backend", &self.backend.name())
            .field("registry", &self.registry)
            .finish()
    }
}
