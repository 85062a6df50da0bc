use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by the persistent blob cache.
///
/// These never reach the UI: the [`BlobCache`](crate::BlobCache) surface
/// logs them and degrades to a miss or a no-op.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Cache table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Cache storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Cache transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Cache commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Unsupported cache schema version {found} (expected {expected})")]
    SchemaMismatch { found: u64, expected: u64 },

    #[error("Cache worker failed: {source}")]
    Worker {
        #[from]
        source: tokio::task::JoinError,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl CacheError {
    /// Create a schema mismatch error
    pub fn schema_mismatch(found: u64, expected: u64) -> Self {
        Self::SchemaMismatch { found, expected }
    }
}
