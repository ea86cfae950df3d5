use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::{KvBackend, KvIter, KvPair};

/// In-memory, `BTreeMap`-based engine.
///
/// Intended for tests and embedding. All pairs are held behind a `RwLock`
/// and cloned on read/write. Data is lost when the backend is dropped.
pub struct InMemoryBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.map.read().expect("lock poisoned").len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.map.read().expect("lock poisoned").is_empty()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let map = self.map.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.ensure_open()?;
        let mut map = self.map.write().expect("lock poisoned");
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        self.ensure_open()?;
        let mut map = self.map.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    fn iter(&self) -> StoreResult<KvIter> {
        self.ensure_open()?;
        let map = self.map.read().expect("lock poisoned");
        let pairs: Vec<KvPair> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Ok(Box::new(pairs.into_iter()))
    }

    fn approx_count(&self) -> i64 {
        self.len() as i64
    }

    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.map.read().expect("lock poisoned").contains_key(key))
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("key_count", &self.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get() {
        let backend = InMemoryBackend::new();
        backend.put(b"a", b"1").unwrap();
        assert_eq!(backend.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(backend.get(b"missing").unwrap().is_none());
    }

    #[test]
    fn put_overwrites() {
        let backend = InMemoryBackend::new();
        backend.put(b"a", b"1").unwrap();
        backend.put(b"a", b"2").unwrap();
        assert_eq!(backend.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.approx_count(), 1);
    }

    #[test]
    fn delete_reports_presence() {
        let backend = InMemoryBackend::new();
        backend.put(b"a", b"1").unwrap();
        assert!(backend.delete(b"a").unwrap());
        assert!(!backend.delete(b"a").unwrap());
        assert!(!backend.contains(b"a").unwrap());
    }

    #[test]
    fn iter_is_sorted_snapshot() {
        let backend = InMemoryBackend::new();
        backend.put(b"c", b"3").unwrap();
        backend.put(b"a", b"1").unwrap();
        backend.put(b"b", b"2").unwrap();

        let iter = backend.iter().unwrap();
        // Writes after the snapshot are not observed.
        backend.put(b"d", b"4").unwrap();

        let keys: Vec<Vec<u8>> = iter.map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn closed_backend_rejects_operations() {
        let backend = InMemoryBackend::new();
        backend.close().unwrap();
        assert!(matches!(backend.get(b"a"), Err(StoreError::Closed)));
        assert!(matches!(backend.put(b"a", b"1"), Err(StoreError::Closed)));
        assert!(matches!(backend.iter(), Err(StoreError::Closed)));
        // Closing twice is fine.
        backend.close().unwrap();
    }

    #[test]
    fn debug_format() {
        let backend = InMemoryBackend::new();
        let debug = format!("{backend:?}");
        assert!(debug.contains("InMemoryBackend"));
        assert!(debug.contains("key_count"));
    }
}
