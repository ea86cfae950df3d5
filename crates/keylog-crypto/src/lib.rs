//! Cryptographic primitives for keylog.
//!
//! Provides the [`EntryHasher`] seam through which callers supply the
//! content-hash function, a domain-separated BLAKE3 default
//! ([`ContentHasher`]), and verification of stored entry chains.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod chain;
pub mod hasher;

pub use chain::{ChainVerifyError, EntryChainVerifier};
pub use hasher::{ContentHasher, EntryHasher};
