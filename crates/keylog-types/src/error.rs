use thiserror::Error;

use crate::id::EntryId;

/// Errors produced by type conversions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Errors produced by hash-chain mutations and traversal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// `previous` did not match the current tip of the chain.
    #[error("chain mismatch: expected previous {expected}, got {got}")]
    Mismatch { expected: EntryId, got: EntryId },

    /// The seek id passed to an iteration is not part of the chain.
    #[error("seek entry not in chain: {0}")]
    SeekNotFound(EntryId),
}
