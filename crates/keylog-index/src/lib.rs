//! Keylog indexes for the append-only log.
//!
//! A keylog is the ordered hash chain of entry ids belonging to one key,
//! plus a replication marker. This crate keeps at most one in-memory
//! instance of each keylog alive at a time, shares it between every caller
//! that opened it, and writes it back to durable storage when the last
//! caller closes it.
//!
//! # Key Types
//!
//! - [`KeylogIndex`] -- Lock-guarded keylog shared by all open holders
//! - [`OpenIndexes`] -- Reference-counted registry of open keylogs
//! - [`IndexStore`] -- Create/get/mark/remove/iterate keylogs over a backend
//!
//! # Locking
//!
//! Two kinds of locks exist: the registry mutex (map lookups and refcounts)
//! and each index's read/write lock (chain mutation and serialization). An
//! index lock is never taken while the registry mutex is held, and neither
//! is held during durable I/O.

pub mod error;
pub mod keylog;
pub mod registry;
pub mod store;

pub use error::{IndexError, IndexResult};
pub use keylog::KeylogIndex;
pub use registry::OpenIndexes;
pub use store::IndexStore;
