use crate::error::StoreResult;

/// A raw key/value pair as held by a backend.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// One-shot, finite sequence of pairs produced by [`KvBackend::iter`].
pub type KvIter = Box<dyn Iterator<Item = KvPair> + Send>;

/// Durable key-value engine consumed by the entry and index stores.
///
/// All implementations must satisfy these invariants:
/// - Operations are safe to call from many threads at once.
/// - `iter` yields pairs in ascending key order, reflecting the state at the
///   time of the call.
/// - After `close`, every operation fails with `StoreError::Closed`.
/// - All I/O errors are propagated, never silently ignored.
pub trait KvBackend: Send + Sync {
    /// Short engine name for diagnostics.
    fn name(&self) -> &'static str;

    /// Read the value stored under `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Delete `key`. Returns `true` if the key existed.
    fn delete(&self, key: &[u8]) -> StoreResult<bool>;

    /// Snapshot iteration over every stored pair.
    fn iter(&self) -> StoreResult<KvIter>;

    /// Approximate number of stored keys. Not required to be exact.
    fn approx_count(&self) -> i64;

    /// Release backend resources. Idempotent.
    fn close(&self) -> StoreResult<()>;

    /// Check whether `key` exists.
    ///
    /// Default implementation reads the value. Backends may override.
    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
