//! The unsynchronized per-key hash-chain index.
//!
//! [`KeylogIndexState`] holds no lock. Callers that share it between threads
//! wrap it (see `keylog_index::KeylogIndex`).

use serde::{Deserialize, Serialize};

use crate::error::ChainError;
use crate::id::EntryId;
use crate::key::LogKey;

/// Ordered chain of entry ids for one key, plus a replication marker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylogIndexState {
    /// The key this chain belongs to.
    pub key: LogKey,
    /// Opaque application checkpoint. Empty until first set.
    pub marker: Vec<u8>,
    /// Entry ids, oldest first.
    pub chain: Vec<EntryId>,
}

impl KeylogIndexState {
    /// Create an empty chain for `key`.
    pub fn new(key: impl Into<LogKey>) -> Self {
        Self {
            key: key.into(),
            marker: Vec::new(),
            chain: Vec::new(),
        }
    }

    /// Number of entries in the chain.
    pub fn height(&self) -> u32 {
        self.chain.len() as u32
    }

    /// Number of entries in the chain.
    pub fn count(&self) -> usize {
        self.chain.len()
    }

    /// The most recent entry id, if any.
    pub fn last(&self) -> Option<EntryId> {
        self.chain.last().copied()
    }

    /// Returns `true` if `id` is part of the chain.
    pub fn contains(&self, id: &EntryId) -> bool {
        self.chain.contains(id)
    }

    /// Set the marker. Returns `false` if `marker` was already current.
    pub fn set_marker(&mut self, marker: &[u8]) -> bool {
        if self.marker == marker {
            return false;
        }
        self.marker = marker.to_vec();
        true
    }

    /// Append `id` after `prev`.
    ///
    /// `prev` must equal the current last id, or be zero when the chain is
    /// empty. On error the chain is unchanged.
    pub fn append(&mut self, id: EntryId, prev: EntryId) -> Result<(), ChainError> {
        let expected = self.last().unwrap_or_else(EntryId::zero);
        if prev != expected {
            return Err(ChainError::Mismatch {
                expected,
                got: prev,
            });
        }
        self.chain.push(id);
        Ok(())
    }

    /// Remove the last entry id. Returns the new height and whether an id
    /// was removed.
    pub fn rollback(&mut self) -> (u32, bool) {
        let removed = self.chain.pop().is_some();
        (self.height(), removed)
    }

    /// Visit entry ids in order, starting at `seek` (inclusive).
    ///
    /// A `None` or zero seek starts at the oldest entry. Stops at the first
    /// error returned by `visit`.
    pub fn iter<E, F>(&self, seek: Option<&EntryId>, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&EntryId) -> Result<(), E>,
        E: From<ChainError>,
    {
        let start = match seek {
            Some(id) if !id.is_zero() => self
                .chain
                .iter()
                .position(|e| e == id)
                .ok_or(ChainError::SeekNotFound(*id))?,
            _ => 0,
        };
        for id in &self.chain[start..] {
            visit(id)?;
        }
        Ok(())
    }
}
