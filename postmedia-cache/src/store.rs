use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

/// Local key → binary store keyed by remote file identifier.
///
/// Every operation is infallible from the caller's point of view: an
/// implementation that cannot reach its backing store logs the failure and
/// behaves as if the entry were absent. Losing a cache entry is never fatal,
/// the pipeline can always refetch.
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Look up a cached blob. Any failure is reported as a miss.
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Store (or overwrite) a blob.
    async fn put(&self, key: &str, value: Bytes);

    /// Remove a single entry. Missing keys are ignored.
    async fn delete(&self, key: &str);

    /// Drop every entry.
    async fn clear(&self);
}

/// In-process cache with no persistence.
///
/// Counts every call so callers can assert which paths touched the cache.
#[derive(Debug, Default)]
pub struct MemoryBlobCache {
    entries: Mutex<HashMap<String, Bytes>>,
    operations: AtomicUsize,
}

impl MemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get`/`put`/`delete`/`clear` calls served so far
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn touch(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        self.touch();
        self.entries.lock().get(key).cloned()
    }

    async fn put(&self, key: &str, value: Bytes) {
        self.touch();
        self.entries.lock().insert(key.to_string(), value);
    }

    async fn delete(&self, key: &str) {
        self.touch();
        self.entries.lock().remove(key);
    }

    async fn clear(&self) {
        self.touch();
        self.entries.lock().clear();
    }
}
