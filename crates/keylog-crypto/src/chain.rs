use keylog_types::{EntryId, LogEntry, LogKey};

use crate::hasher::EntryHasher;

/// Verifies that a sequence of stored entries forms a valid keylog chain.
///
/// Checks, in order, for each position:
/// 1. The entry belongs to the expected key
/// 2. The first entry's `previous` is zero; later entries point at the id
///    before them
/// 3. The recorded id recomputes from the entry's canonical bytes
pub struct EntryChainVerifier<'a> {
    hasher: &'a dyn EntryHasher,
}

impl<'a> EntryChainVerifier<'a> {
    pub fn new(hasher: &'a dyn EntryHasher) -> Self {
        Self { hasher }
    }

    /// Verify `(id, entry)` pairs, oldest first, against `key`.
    pub fn verify(&self, key: &LogKey, entries: &[(EntryId, LogEntry)]) -> Result<(), ChainVerifyError> {
        let mut expected_prev = EntryId::zero();
        for (index, (id, entry)) in entries.iter().enumerate() {
            if entry.key != *key {
                return Err(ChainVerifyError::ForeignKey { index });
            }
            if entry.previous != expected_prev {
                return Err(if index == 0 {
                    ChainVerifyError::FirstHasPrevious
                } else {
                    ChainVerifyError::BrokenLink { index }
                });
            }
            if self.hasher.entry_id(entry) != *id {
                return Err(ChainVerifyError::HashMismatch { index });
            }
            expected_prev = *id;
        }
        Ok(())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainVerifyError {
    #[error("first entry has a non-zero previous id")]
    FirstHasPrevious,

    #[error("broken link at index {index}: previous does not match")]
    BrokenLink { index: usize },

    #[error("hash mismatch at index {index}: computed id differs from stored")]
    HashMismatch { index: usize },

    #[error("entry at index {index} belongs to another key")]
    ForeignKey { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::ContentHasher;

    fn build_chain(key: &str, count: usize) -> Vec<(EntryId, LogEntry)> {
        let hasher = ContentHasher::ENTRY;
        let mut chain = Vec::new();
        let mut prev = EntryId::zero();
        for i in 0..count {
            let entry = LogEntry::new(prev, key, i as u64, format!("entry-{i}").into_bytes());
            let id = hasher.entry_id(&entry);
            chain.push((id, entry));
            prev = id;
        }
        chain
    }

    fn verify(chain: &[(EntryId, LogEntry)]) -> Result<(), ChainVerifyError> {
        EntryChainVerifier::new(&ContentHasher::ENTRY).verify(&LogKey::from("k"), chain)
    }

    #[test]
    fn empty_chain_is_valid() {
        assert!(verify(&[]).is_ok());
    }

    #[test]
    fn multi_entry_chain() {
        assert!(verify(&build_chain("k", 10)).is_ok());
    }

    #[test]
    fn first_with_previous_fails() {
        let mut chain = build_chain("k", 1);
        chain[0].1.previous = EntryId::from_hash([1; 32]);
        assert_eq!(verify(&chain).unwrap_err(), ChainVerifyError::FirstHasPrevious);
    }

    #[test]
    fn broken_link_detected() {
        let mut chain = build_chain("k", 3);
        chain[2].1.previous = EntryId::from_hash([99; 32]);
        assert_eq!(
            verify(&chain).unwrap_err(),
            ChainVerifyError::BrokenLink { index: 2 }
        );
    }

    #[test]
    fn tampered_payload_detected() {
        let mut chain = build_chain("k", 3);
        chain[1].1.payload = b"tampered".to_vec();
        assert_eq!(
            verify(&chain).unwrap_err(),
            ChainVerifyError::HashMismatch { index: 1 }
        );
    }

    #[test]
    fn foreign_key_detected() {
        let chain = build_chain("other", 2);
        assert_eq!(
            verify(&chain).unwrap_err(),
            ChainVerifyError::ForeignKey { index: 0 }
        );
    }
}
