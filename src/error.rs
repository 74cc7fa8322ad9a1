//! Unified error types for shardvault
//!
//! Every sub-store reports [`StorageError`]; the shard and index layers add
//! the lifecycle, schema and routing failures on top.

use crate::schema::DataType;
use crate::storage::StorageError;
use crate::wal::entry::WalError;

/// Main error type for index and shard operations
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Root path or persisted shard metadata unusable
    #[error("Failed to initialize index {class}: {reason}")]
    Initialization { class: String, reason: String },

    /// Write-class operation on a read-only shard
    #[error("Shard {shard} is read-only")]
    ShardReadOnly { shard: String },

    /// Any operation on a dropped shard
    #[error("Shard {shard} has been dropped")]
    ShardDropped { shard: String },

    /// Any operation on a shard whose handles were released by shutdown
    #[error("Shard {shard} is closed")]
    ShardClosed { shard: String },

    /// Property already exists with another type
    #[error("Property {property} already exists as {existing}, cannot redeclare as {requested}")]
    SchemaConflict {
        property: String,
        existing: DataType,
        requested: DataType,
    },

    /// Caller supplied data inconsistent with the schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// Vector dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Shard name not part of this index
    #[error("Unknown shard: {shard}")]
    UnknownShard { shard: String },

    /// The cancellation token fired before the operation started writing
    #[error("Operation cancelled")]
    Cancelled,

    /// Storage layer errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Record log errors
    #[error("Log error: {0}")]
    Wal(#[from] WalError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted metadata could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A spawned write or drop task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias for shardvault operations
pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    pub fn initialization(class: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Initialization {
            class: class.into(),
            reason: reason.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    pub fn unknown_shard(shard: impl Into<String>) -> Self {
        Self::UnknownShard {
            shard: shard.into(),
        }
    }

    /// Rejected because of data the caller supplied
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::DimensionMismatch { .. } | Self::SchemaConflict { .. }
        )
    }

    /// Rejected because of the current shard state; the caller may retry
    /// after a status change or against a fresh index
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::ShardReadOnly { .. } | Self::ShardDropped { .. } | Self::ShardClosed { .. }
        )
    }
}
