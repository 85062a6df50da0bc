//! Persistent blob cache backed by a single redb file.
//!
//! The database is opened on first use and the handle is kept for the
//! lifetime of the [`RedbBlobCache`]. Construct one per process and share it
//! by `Arc`; there is no hidden global.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::{BlobCache, CacheError, CacheResult};

/// Blob table: remote file id → raw bytes
const BLOB_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// Bookkeeping table holding the schema version
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SCHEMA_KEY: &str = "schema_version";

/// Current on-disk schema version
pub const SCHEMA_VERSION: u64 = 1;

/// redb-backed implementation of [`BlobCache`].
pub struct RedbBlobCache {
    path: PathBuf,
    db: OnceCell<Arc<Database>>,
}

impl RedbBlobCache {
    /// Create a cache handle for the given file. Nothing is opened until the
    /// first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the database has been opened yet
    pub fn is_open(&self) -> bool {
        self.db.initialized()
    }

    /// Open the database (creating it and its tables if needed) and cache the
    /// handle. A failed open leaves the cell empty so the next call retries.
    async fn database(&self) -> CacheResult<Arc<Database>> {
        let db = self
            .db
            .get_or_try_init(|| async {
                let path = self.path.clone();
                let db = tokio::task::spawn_blocking(move || open_database(&path)).await??;
                debug!("Opened blob cache at {}", self.path.display());
                Ok::<_, CacheError>(Arc::new(db))
            })
            .await?;
        Ok(db.clone())
    }

    /// Fallible lookup.
    pub async fn try_get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let db = self.database().await?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> CacheResult<Option<Bytes>> {
            let txn = db.begin_read()?;
            let table = txn.open_table(BLOB_TABLE)?;
            let value = table
                .get(key.as_str())?
                .map(|guard| Bytes::copy_from_slice(guard.value()));
            Ok(value)
        })
        .await?
    }

    /// Fallible insert-or-overwrite.
    pub async fn try_put(&self, key: &str, value: Bytes) -> CacheResult<()> {
        let db = self.database().await?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> CacheResult<()> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(BLOB_TABLE)?;
                table.insert(key.as_str(), value.as_ref())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    /// Fallible removal.
    pub async fn try_delete(&self, key: &str) -> CacheResult<()> {
        let db = self.database().await?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> CacheResult<()> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(BLOB_TABLE)?;
                table.remove(key.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    /// Fallible clear. The blob table is dropped and recreated empty.
    pub async fn try_clear(&self) -> CacheResult<()> {
        let db = self.database().await?;
        tokio::task::spawn_blocking(move || -> CacheResult<()> {
            let txn = db.begin_write()?;
            txn.delete_table(BLOB_TABLE)?;
            txn.open_table(BLOB_TABLE)?;
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    /// Number of cached entries.
    pub async fn try_len(&self) -> CacheResult<u64> {
        let db = self.database().await?;
        tokio::task::spawn_blocking(move || -> CacheResult<u64> {
            let txn = db.begin_read()?;
            let table = txn.open_table(BLOB_TABLE)?;
            Ok(table.len()?)
        })
        .await?
    }
}

fn open_database(path: &Path) -> CacheResult<Database> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Database::create(path)?;
    let txn = db.begin_write()?;
    {
        let mut meta = txn.open_table(META_TABLE)?;
        let found = meta.get(SCHEMA_KEY)?.map(|guard| guard.value());
        match found {
            None => {
                meta.insert(SCHEMA_KEY, SCHEMA_VERSION)?;
            }
            Some(version) if version == SCHEMA_VERSION => {}
            Some(version) => return Err(CacheError::schema_mismatch(version, SCHEMA_VERSION)),
        }
    }
    txn.open_table(BLOB_TABLE)?;
    txn.commit()?;

    Ok(db)
}

#[async_trait]
impl BlobCache for RedbBlobCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Blob cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn put(&self, key: &str, value: Bytes) {
        if let Err(e) = self.try_put(key, value).await {
            warn!("Blob cache write failed for {}: {}", key, e);
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.try_delete(key).await {
            warn!("Blob cache delete failed for {}: {}", key, e);
        }
    }

    async fn clear(&self) {
        if let Err(e) = self.try_clear().await {
            warn!("Blob cache clear failed: {}", e);
        }
    }
}
