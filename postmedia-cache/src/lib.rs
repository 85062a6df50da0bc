//! # postmedia-cache: local media cache and object URL lifetimes
//!
//! Two small pieces the media pipeline builds on:
//!
//! - [`BlobCache`]: a key → bytes store keyed by remote file id. The
//!   persistent [`RedbBlobCache`] survives restarts; failures degrade to a
//!   cache miss instead of surfacing.
//! - [`BlobUrlManager`]: an arena of ephemeral `blob:` URLs, one per key,
//!   released exactly once.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use postmedia_cache::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = RedbBlobCache::new("media-cache.redb");
//! cache.put("file-id", bytes::Bytes::from_static(b"...")).await;
//!
//! let registry = Arc::new(ObjectUrlRegistry::new());
//! let mut urls = BlobUrlManager::new(registry.clone());
//! if let Some(bytes) = cache.get("file-id").await {
//!     urls.add_url("file-id", registry.create(bytes, "image/png"));
//! }
//! urls.release_all();
//! # }
//! ```

mod error;
mod redb_store;
pub mod store;
pub mod urls;

pub use error::{CacheError, CacheResult};
pub use redb_store::{RedbBlobCache, SCHEMA_VERSION};
pub use store::{BlobCache, MemoryBlobCache};
pub use urls::{
    is_object_url, BlobUrlManager, ObjectUrlEntry, ObjectUrlRegistry, UrlRevoker,
    OBJECT_URL_SCHEME,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobCache, BlobUrlManager, CacheError, CacheResult, MemoryBlobCache, ObjectUrlRegistry,
        RedbBlobCache,
    };
}
