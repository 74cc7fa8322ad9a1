//! Storage abstraction layer
//!
//! Provides the block storage trait every persisted structure writes through,
//! a local filesystem implementation, and the lifecycle contract shared by the
//! three per-shard sub-stores.

pub mod local;

use async_trait::async_trait;
use std::path::Path;

pub use local::LocalBlockStorage;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Store is closed: {path}")]
    Closed { path: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn closed(path: impl Into<String>) -> Self {
        Self::Closed { path: path.into() }
    }

    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Block storage trait
///
/// A persistent file tree addressed by paths relative to a root:
/// - Random read/write access
/// - fsync for durability
/// - Directory management for shard layouts
#[async_trait]
pub trait BlockStorage: Send + Sync + 'static {
    /// Write data to a file path (relative to storage root)
    /// Does NOT guarantee durability until sync() is called
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// Write data at a specific offset
    /// Creates/extends file if needed. Does NOT guarantee durability until sync() is called
    async fn write_at(&self, path: &str, offset: usize, data: &[u8]) -> StorageResult<()>;

    /// Append data to a file, returns the offset where data was written
    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<u64>;

    /// Read entire file
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Read range of bytes from file
    async fn read_range(&self, path: &str, offset: u64, length: usize) -> StorageResult<Vec<u8>>;

    /// Check if file or directory exists
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Get file size
    async fn size(&self, path: &str) -> StorageResult<u64>;

    /// Sync file to durable storage (fsync)
    async fn sync(&self, path: &str) -> StorageResult<()>;

    /// Cut file to `len` bytes and fsync it
    async fn truncate(&self, path: &str, len: u64) -> StorageResult<()>;

    /// Atomically replace `to` with `from`
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Delete file. Deleting a missing file is not an error.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// List entries of a directory as `prefix/name`
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Create directory (and parents)
    async fn create_dir(&self, path: &str) -> StorageResult<()>;

    /// Remove a directory and everything below it. Missing is not an error.
    async fn remove_dir(&self, path: &str) -> StorageResult<()>;

    /// Get memory-mapped view of file (for zero-copy reads)
    fn mmap(&self, path: &str) -> StorageResult<Option<memmap2::Mmap>>;

    /// Get the root path (for diagnostics)
    fn root_path(&self) -> &Path;
}

/// Lifecycle operations shared by the object store, the property index and
/// the vector index of a shard.
#[async_trait]
pub trait SubStore: Send + Sync + std::fmt::Debug + 'static {
    /// Make every acknowledged write durable
    async fn flush(&self) -> StorageResult<()>;

    /// Flush and release resources without deleting data. Idempotent.
    async fn close(&self) -> StorageResult<()>;

    /// Close and delete every persisted artifact, including the ones created
    /// at initialization. Idempotent.
    async fn wipe(&self) -> StorageResult<()>;

    /// Relative paths of the files this store persists
    fn artifacts(&self) -> Vec<String>;

    /// Name of this implementation (for logging)
    fn kind_name(&self) -> &'static str;
}
