//! The immutable log entry.

use serde::{Deserialize, Serialize};

use crate::id::EntryId;
use crate::key::LogKey;

/// A single immutable record in a keylog.
///
/// The entry's identity is the digest of [`LogEntry::canonical_bytes`]; the
/// hash function is supplied by the caller, never by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Id of the preceding entry for the same key, zero for the first one.
    pub previous: EntryId,
    /// Key this entry belongs to.
    pub key: LogKey,
    /// Caller-assigned timestamp (nanoseconds by convention).
    pub timestamp: u64,
    /// Opaque application payload.
    pub payload: Vec<u8>,
}

impl LogEntry {
    /// Create a new entry.
    pub fn new(
        previous: EntryId,
        key: impl Into<LogKey>,
        timestamp: u64,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            previous,
            key: key.into(),
            timestamp,
            payload: payload.into(),
        }
    }

    /// Returns `true` if this entry starts a chain.
    pub fn is_first(&self) -> bool {
        self.previous.is_zero()
    }

    /// Deterministic byte form used for content addressing.
    ///
    /// Layout: `previous (32) | key_len (u32 LE) | key | timestamp (u64 LE) |
    /// payload_len (u32 LE) | payload`. Length prefixes keep field boundaries
    /// unambiguous.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let key = self.key.as_bytes();
        let mut out = Vec::with_capacity(EntryId::LEN + 16 + key.len() + self.payload.len());
        out.extend_from_slice(self.previous.as_bytes());
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_are_deterministic() {
        let e1 = LogEntry::new(EntryId::zero(), "key", 42, b"payload".to_vec());
        let e2 = e1.clone();
        assert_eq!(e1.canonical_bytes(), e2.canonical_bytes());
    }

    #[test]
    fn canonical_bytes_separate_fields() {
        // Moving a byte from key to payload must change the encoding.
        let a = LogEntry::new(EntryId::zero(), "ab", 1, b"c".to_vec());
        let b = LogEntry::new(EntryId::zero(), "a", 1, b"bc".to_vec());
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn first_entry_has_zero_previous() {
        let first = LogEntry::new(EntryId::zero(), "k", 0, Vec::new());
        assert!(first.is_first());
        let second = LogEntry::new(EntryId::from_hash([1; 32]), "k", 1, Vec::new());
        assert!(!second.is_first());
    }
}
