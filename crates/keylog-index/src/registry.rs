//! Reference-counted registry of open keylog indexes.
//!
//! Every open key has exactly one [`KeylogIndex`] in memory, shared by all
//! holders. Each `get` adds a reference and each `close` drops one; the last
//! close flushes the index to the backend and evicts it.
//!
//! A key's slot also records in-flight work. While one caller loads a key
//! from durable storage (or removes it), other callers of the same key wait
//! on the registry's condition variable instead of racing the load. This
//! keeps a getter from reading a record that a concurrent final flush is
//! about to overwrite.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use keylog_store::KvBackend;
use keylog_types::{KeylogIndexState, LogKey};
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::keylog::KeylogIndex;

enum Slot {
    /// A caller is reading or creating the index.
    Loading,
    /// A caller is deleting the durable record.
    Removing,
    Open(Handle),
}

struct Handle {
    refs: usize,
    /// Final-close flushes in progress for this handle.
    flushing: usize,
    index: Arc<KeylogIndex>,
}

/// Outcome of [`OpenIndexes::acquire`].
pub(crate) enum Acquired<'a> {
    /// The key was open; one reference was added.
    Open(Arc<KeylogIndex>),
    /// The key was not open; the caller now owns its slot.
    Claimed(SlotClaim<'a>),
}

/// Exclusive right to install an index for a key.
///
/// Dropping an unfulfilled claim frees the slot and wakes waiters.
pub(crate) struct SlotClaim<'a> {
    registry: &'a Arc<OpenIndexes>,
    key: LogKey,
    done: bool,
}

impl SlotClaim<'_> {
    /// Install `state` as the open index for the claimed key, with one
    /// reference owned by the caller.
    pub(crate) fn fulfil(mut self, state: KeylogIndexState) -> Arc<KeylogIndex> {
        let index = self.registry.build(state);
        let mut slots = self.registry.lock();
        slots.insert(
            self.key.clone(),
            Slot::Open(Handle {
                refs: 1,
                flushing: 0,
                index: Arc::clone(&index),
            }),
        );
        self.registry.changed.notify_all();
        self.done = true;
        debug!(key = %self.key, "keylog opened");
        index
    }
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut slots = self.registry.lock();
        if matches!(slots.get(&self.key), Some(Slot::Loading | Slot::Removing)) {
            slots.remove(&self.key);
        }
        self.registry.changed.notify_all();
    }
}

/// The set of keylog indexes currently held open, scoped to one store.
pub struct OpenIndexes {
    backend: Arc<dyn KvBackend>,
    slots: Mutex<HashMap<LogKey, Slot>>,
    changed: Condvar,
}

impl OpenIndexes {
    /// Create an empty registry whose indexes flush to `backend`.
    pub fn new(backend: Arc<dyn KvBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            slots: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
        })
    }

    /// Register `state` as an open index with one reference.
    ///
    /// If the key is already open the existing index is shared instead and
    /// `state` is discarded. If another caller is loading or removing the
    /// key, waits for that to finish first.
    pub fn register(self: &Arc<Self>, state: KeylogIndexState) -> Arc<KeylogIndex> {
        let key = state.key.clone();
        match self.acquire(key.as_bytes()) {
            Acquired::Open(index) => index,
            Acquired::Claimed(claim) => claim.fulfil(state),
        }
    }

    /// Add a reference to an open index. Never touches durable storage.
    pub fn get(&self, key: &[u8]) -> Option<Arc<KeylogIndex>> {
        let mut slots = self.lock();
        match slots.get_mut(key) {
            Some(Slot::Open(handle)) => {
                handle.refs += 1;
                Some(Arc::clone(&handle.index))
            }
            _ => None,
        }
    }

    /// Drop one reference to `key`. The last close flushes and evicts.
    ///
    /// Flush errors are returned, but the handle is evicted regardless.
    pub fn close(&self, key: &[u8]) -> IndexResult<()> {
        self.release(key, None)
    }

    /// Returns `true` if `key` has an open handle.
    pub fn is_open(&self, key: &[u8]) -> bool {
        matches!(self.lock().get(key), Some(Slot::Open(handle)) if handle.refs > 0)
    }

    /// Outstanding references to `key`, if it is open.
    pub fn ref_count(&self, key: &[u8]) -> Option<usize> {
        match self.lock().get(key) {
            Some(Slot::Open(handle)) if handle.refs > 0 => Some(handle.refs),
            _ => None,
        }
    }

    /// Number of open keys.
    pub fn open_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Open(handle) if handle.refs > 0))
            .count()
    }

    /// Evict every open index and flush each one.
    ///
    /// Keeps going past flush failures; each is logged and the last one is
    /// returned.
    pub fn close_all(&self) -> IndexResult<()> {
        let evicted: Vec<Arc<KeylogIndex>> = {
            let mut slots = self.lock();
            let keys: Vec<LogKey> = slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Open(_)))
                .map(|(key, _)| key.clone())
                .collect();
            let evicted = keys
                .iter()
                .filter_map(|key| match slots.remove(key) {
                    Some(Slot::Open(handle)) => Some(handle.index),
                    _ => None,
                })
                .collect();
            self.changed.notify_all();
            evicted
        };

        let mut last_err = None;
        for index in &evicted {
            if let Err(e) = index.flush() {
                warn!(key = %index.log_key(), error = %e, "flush failed while closing all keylogs");
                last_err = Some(e);
            }
        }
        debug!(count = evicted.len(), "all keylogs closed");
        last_err.map_or(Ok(()), Err)
    }

    /// Add a reference to `key` if it is open, or claim its slot so the
    /// caller can load it. Waits while another caller holds the slot.
    pub(crate) fn acquire<'a>(self: &'a Arc<Self>, key: &[u8]) -> Acquired<'a> {
        let mut slots = self.lock();
        loop {
            let busy = match slots.get_mut(key) {
                Some(Slot::Open(handle)) => {
                    handle.refs += 1;
                    return Acquired::Open(Arc::clone(&handle.index));
                }
                Some(Slot::Loading | Slot::Removing) => true,
                None => false,
            };
            if !busy {
                slots.insert(LogKey::from(key), Slot::Loading);
                return Acquired::Claimed(self.claim_slot(key));
            }
            slots = self.changed.wait(slots).expect("lock poisoned");
        }
    }

    /// Claim `key` for creation. Fails with `AlreadyOpen` if it is open.
    pub(crate) fn claim<'a>(self: &'a Arc<Self>, key: &[u8]) -> IndexResult<SlotClaim<'a>> {
        self.claim_as(key, Slot::Loading)
    }

    /// Claim `key` for removal. Fails with `StillOpen` if it is open.
    pub(crate) fn claim_removal<'a>(
        self: &'a Arc<Self>,
        key: &[u8],
    ) -> IndexResult<SlotClaim<'a>> {
        self.claim_as(key, Slot::Removing)
    }

    fn claim_as<'a>(self: &'a Arc<Self>, key: &[u8], intent: Slot) -> IndexResult<SlotClaim<'a>> {
        let removing = matches!(intent, Slot::Removing);
        let mut slots = self.lock();
        loop {
            let busy = match slots.get(key) {
                Some(Slot::Open(handle)) if handle.refs > 0 => {
                    let key = LogKey::from(key);
                    return Err(if removing {
                        IndexError::StillOpen(key)
                    } else {
                        IndexError::AlreadyOpen(key)
                    });
                }
                // Open with no references is a final flush still in flight.
                Some(_) => true,
                None => false,
            };
            if !busy {
                slots.insert(LogKey::from(key), intent);
                return Ok(self.claim_slot(key));
            }
            slots = self.changed.wait(slots).expect("lock poisoned");
        }
    }

    fn claim_slot<'a>(self: &'a Arc<Self>, key: &[u8]) -> SlotClaim<'a> {
        SlotClaim {
            registry: self,
            key: LogKey::from(key),
            done: false,
        }
    }

    /// Return the open index for `key` without adding a reference.
    pub(crate) fn peek(&self, key: &[u8]) -> Option<Arc<KeylogIndex>> {
        match self.lock().get(key) {
            Some(Slot::Open(handle)) => Some(Arc::clone(&handle.index)),
            _ => None,
        }
    }

    /// Drop one reference. With `caller` set, only releases if the open
    /// handle is that exact index.
    pub(crate) fn release(&self, key: &[u8], caller: Option<&KeylogIndex>) -> IndexResult<()> {
        let index = {
            let mut slots = self.lock();
            let handle = match slots.get_mut(key) {
                Some(Slot::Open(handle))
                    if handle.refs > 0
                        && caller.map_or(true, |c| std::ptr::eq(Arc::as_ptr(&handle.index), c)) =>
                {
                    handle
                }
                _ => return Err(IndexError::NotFound(LogKey::from(key))),
            };
            handle.refs -= 1;
            if handle.refs > 0 {
                return Ok(());
            }
            handle.flushing += 1;
            Arc::clone(&handle.index)
        };

        let result = index.flush();

        let mut slots = self.lock();
        if let Some(Slot::Open(handle)) = slots.get_mut(key) {
            if Arc::ptr_eq(&handle.index, &index) {
                handle.flushing -= 1;
                if handle.refs == 0 && handle.flushing == 0 {
                    slots.remove(key);
                    self.changed.notify_all();
                    debug!(key = %index.log_key(), "keylog evicted");
                }
            }
        }
        drop(slots);

        if let Err(e) = &result {
            warn!(key = %index.log_key(), error = %e, "flush failed on final close");
        }
        result
    }

    fn build(self: &Arc<Self>, state: KeylogIndexState) -> Arc<KeylogIndex> {
        Arc::new(KeylogIndex::new(
            state,
            Arc::clone(&self.backend),
            Arc::downgrade(self),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LogKey, Slot>> {
        self.slots.lock().expect("lock poisoned")
    }
}

impl std::fmt::Debug for OpenIndexes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenIndexes")
            .field("backend", &self.backend.name())
            .field("open", &self.open_count())
            .finish()
    }
}
