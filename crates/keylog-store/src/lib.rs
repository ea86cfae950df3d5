//! Durable storage for keylog.
//!
//! This crate owns everything below the index layer: the [`KvBackend`]
//! adapter trait, two engines implementing it, the versioned record codec,
//! and the content-addressed [`EntryStore`].
//!
//! # Storage Backends
//!
//! - [`InMemoryBackend`] -- `BTreeMap`-based engine for tests and embedding
//! - [`LogBackend`] -- append-only, CRC-framed record file replayed on open
//!
//! # Design Rules
//!
//! 1. Entries are immutable once written under an id.
//! 2. Backends never interpret values -- they are pure byte maps.
//! 3. Iteration yields keys in ascending byte order.
//! 4. All I/O errors are propagated, never silently ignored.
//! 5. A closed backend rejects every further operation with [`StoreError::Closed`].

pub mod codec;
pub mod config;
pub mod entry_store;
pub mod error;
pub mod log;
pub mod memory;
pub mod traits;

pub use codec::{decode, encode, FORMAT_VERSION};
pub use config::{StoreConfig, SyncMode};
pub use entry_store::EntryStore;
pub use error::{StoreError, StoreResult};
pub use log::LogBackend;
pub use memory::InMemoryBackend;
pub use traits::{KvBackend, KvIter, KvPair};
