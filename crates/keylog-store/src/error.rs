use std::path::PathBuf;

use keylog_types::EntryId;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested entry was not found.
    #[error("entry not found: {0}")]
    NotFound(EntryId),

    /// A value could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// Stored bytes could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),

    /// The backend could not be opened or created at `path`.
    #[error("cannot open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend has been closed.
    #[error("store is closed")]
    Closed,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
