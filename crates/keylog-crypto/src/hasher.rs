use keylog_types::{EntryId, LogEntry};

/// Content-hash function used to address entries.
///
/// The store never hashes on its own; callers pick the digest. Implementations
/// must be deterministic and collision resistant in practice.
pub trait EntryHasher: Send + Sync {
    /// Digest raw bytes into an entry id.
    fn hash(&self, data: &[u8]) -> EntryId;

    /// Compute the id of a log entry from its canonical bytes.
    fn entry_id(&self, entry: &LogEntry) -> EntryId {
        self.hash(&entry.canonical_bytes())
    }
}

/// Domain-separated BLAKE3 content hasher.
///
/// The domain tag is prepended to every hash computation, so identical bytes
/// hashed under different domains never collide.
#[derive(Clone, Copy, Debug)]
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for log entries.
    pub const ENTRY: Self = Self {
        domain: "keylog-entry-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Verify that data produces the expected id.
    pub fn verify(&self, data: &[u8], expected: &EntryId) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::ENTRY
    }
}

impl EntryHasher for ContentHasher {
    fn hash(&self, data: &[u8]) -> EntryId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        EntryId::from_hash(*hasher.finalize().as_bytes())
    }
}
