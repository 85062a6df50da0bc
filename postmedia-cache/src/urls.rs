//! Ephemeral object URLs and the arena that owns them.
//!
//! An object URL is a process-local `blob:` reference to bytes held in
//! memory. It stays resolvable until it is revoked; forgetting to revoke it
//! leaks the bytes. [`BlobUrlManager`] tracks one URL per key and guarantees
//! every tracked URL is revoked exactly once, at the latest when the manager
//! is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Scheme prefix of every ephemeral URL minted by [`ObjectUrlRegistry`]
pub const OBJECT_URL_SCHEME: &str = "blob:";

/// Whether a URL denotes an ephemeral, process-local reference.
pub fn is_object_url(url: &str) -> bool {
    url.starts_with(OBJECT_URL_SCHEME)
}

/// Releases ephemeral URLs.
pub trait UrlRevoker: Send + Sync {
    fn revoke(&self, url: &str);
}

/// Content behind an object URL
#[derive(Debug, Clone)]
pub struct ObjectUrlEntry {
    pub bytes: Bytes,
    pub mime_type: String,
}

/// Process-local registry that mints and resolves `blob:` URLs.
#[derive(Debug, Default)]
pub struct ObjectUrlRegistry {
    entries: Mutex<HashMap<String, ObjectUrlEntry>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new URL for the given bytes.
    pub fn create(&self, bytes: Bytes, mime_type: impl Into<String>) -> String {
        let url = format!("{}postmedia/{}", OBJECT_URL_SCHEME, Uuid::new_v4());
        self.entries.lock().insert(
            url.clone(),
            ObjectUrlEntry {
                bytes,
                mime_type: mime_type.into(),
            },
        );
        url
    }

    /// Look up the content of a live URL.
    pub fn resolve(&self, url: &str) -> Option<ObjectUrlEntry> {
        self.entries.lock().get(url).cloned()
    }

    /// Drop the content behind a URL. Returns false if it was not live.
    pub fn release(&self, url: &str) -> bool {
        self.entries.lock().remove(url).is_some()
    }

    /// Number of live URLs
    pub fn live_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl UrlRevoker for ObjectUrlRegistry {
    fn revoke(&self, url: &str) {
        if !self.release(url) {
            debug!("Revoked unknown object URL {}", url);
        }
    }
}

/// Arena of ephemeral URLs keyed by a stable identifier (a remote file id
/// or a local temporary key).
///
/// Invariant: at most one live URL per key. The owner calls
/// [`release_all`](Self::release_all) on teardown; `Drop` does the same for
/// any path that does not.
pub struct BlobUrlManager {
    revoker: Arc<dyn UrlRevoker>,
    urls: HashMap<String, String>,
}

impl BlobUrlManager {
    pub fn new(revoker: Arc<dyn UrlRevoker>) -> Self {
        Self {
            revoker,
            urls: HashMap::new(),
        }
    }

    /// Track `url` under `key`, releasing any URL already tracked there.
    pub fn add_url(&mut self, key: impl Into<String>, url: impl Into<String>) {
        let key = key.into();
        let url = url.into();
        if let Some(previous) = self.urls.remove(&key) {
            if previous != url {
                self.revoke(&previous);
            }
        }
        self.urls.insert(key, url);
    }

    /// Release and forget the URL tracked under `key`. No-op if absent.
    pub fn release_url(&mut self, key: &str) {
        if let Some(url) = self.urls.remove(key) {
            self.revoke(&url);
        }
    }

    /// Release every tracked URL and clear the arena.
    pub fn release_all(&mut self) {
        for (_, url) in self.urls.drain() {
            if is_object_url(&url) {
                self.revoker.revoke(&url);
            }
        }
    }

    pub fn get_url(&self, key: &str) -> Option<&str> {
        self.urls.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.urls.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    // Non-ephemeral URLs (remote placeholders) have nothing to release
    fn revoke(&self, url: &str) {
        if is_object_url(url) {
            self.revoker.revoke(url);
        }
    }
}

impl Drop for BlobUrlManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for BlobUrlManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobUrlManager")
            .field("urls", &self.urls)
            .finish()
    }
}
