//! Centralized default values and constants
//!
//! File names, magic numbers and tuning defaults used throughout the crate.

// ============================================================================
// Shard Layout
// ============================================================================

/// Version marker of a shard directory. Written last on init, deleted last on drop.
pub const SHARD_VERSION_FILE: &str = "shard.version";

/// Object store log
pub const OBJECTS_FILE: &str = "objects.log";

/// Property (inverted) index log
pub const INVERTED_FILE: &str = "inverted.log";

/// Vector arena
pub const VECTORS_FILE: &str = "vectors.bin";

/// Vector id → arena slot log
pub const VECTOR_IDS_FILE: &str = "vectors.ids";

/// Number of artifacts an empty shard persists
pub const MIN_SHARD_ARTIFACTS: usize = 5;

/// Current on-disk layout version recorded in the shard version marker
pub const SHARD_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Record Log Constants
// ============================================================================

/// Record log magic number ("SVL1" in little-endian)
pub const LOG_MAGIC: u32 = 0x314C5653;

/// Record log entry header size in bytes
pub const LOG_HEADER_SIZE: usize = 40;

/// Logs shorter than this are never compacted on open. Longer ones are
/// compacted once at least half their entries are superseded.
pub const LOG_COMPACT_MIN_ENTRIES: usize = 32;

// ============================================================================
// Vector Store Constants
// ============================================================================

/// Vector store file magic number ("VECS" in big-endian ASCII)
pub const VECTOR_STORE_MAGIC: u32 = 0x56454353;

/// Vector store header size in bytes
pub const VECTOR_STORE_HEADER_SIZE: usize = 64;

// ============================================================================
// Concurrency
// ============================================================================

/// Default number of per-identifier write lock stripes in a shard
pub const DEFAULT_LOCK_STRIPES: usize = 64;

// ============================================================================
// Schema
// ============================================================================

/// Name of the implicit property that indexes object identifiers
pub const UUID_PROPERTY: &str = "_id";

/// Default shard name used when an index is created with a single shard
pub const DEFAULT_SHARD_NAME: &str = "shard_0";

// ============================================================================
// Environment Configuration
// ============================================================================

/// Default root directory for the CLI
pub const DEFAULT_ROOT_PATH: &str = "/tmp/shardvault";

/// Default number of shards for the CLI
pub const DEFAULT_SHARD_COUNT: usize = 1;
