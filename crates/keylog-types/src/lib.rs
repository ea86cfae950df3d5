//! Foundation types for keylog.
//!
//! Every other keylog crate depends on `keylog-types`. The types here are
//! plain data: no locking, no I/O.
//!
//! # Key Types
//!
//! - [`EntryId`] -- 32-byte content hash addressing a log entry
//! - [`LogKey`] -- Logical key owning one keylog
//! - [`LogEntry`] -- Immutable record appended to a keylog
//! - [`KeylogIndexState`] -- Ordered hash chain of entry ids plus a marker

pub mod entry;
pub mod error;
pub mod id;
pub mod key;
pub mod keylog;

pub use entry::LogEntry;
pub use error::{ChainError, TypeError};
pub use id::EntryId;
pub use key::LogKey;
pub use keylog::KeylogIndexState;
