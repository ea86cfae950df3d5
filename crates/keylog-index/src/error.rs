//! Error types for the index crate.

use keylog_store::StoreError;
use keylog_types::{ChainError, LogKey};

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The key is neither open nor durably stored.
    #[error("key not found: {0}")]
    NotFound(LogKey),

    /// The key already has a durable record.
    #[error("key already exists: {0}")]
    AlreadyExists(LogKey),

    /// The key already has an open handle.
    #[error("key already open: {0}")]
    AlreadyOpen(LogKey),

    /// The key cannot be removed while a handle is open.
    #[error("key still open: {0}")]
    StillOpen(LogKey),

    /// An append broke chain continuity, or a seek id was unknown.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Backend or codec failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
