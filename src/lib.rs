//! # shardvault
//!
//! Per-class, multi-shard object storage with a property index and a vector
//! index per shard, an explicit shard status state machine, and a drop that
//! leaves nothing behind.
//!
//! ## Architecture
//!
//! ```text
//! Index (one per class, shard routing + lifecycle)
//!     │
//!     ▼
//! Shard (status: Ready ⇄ ReadOnly → Dropped)
//!     ├── ObjectStore    objects.log   (source of truth)
//!     ├── PropertyIndex  inverted.log  (postings, lengths, nulls)
//!     ├── VectorIndex    vectors.bin + vectors.ids
//!     └── shard.version  (written last on init, deleted last on drop)
//! ```
//!
//! ## Features
//!
//! - **Fixed footprint**: an empty shard persists exactly five files
//! - **Durable logs**: every sub-store writes through a CRC32-framed record log
//! - **No partial reads**: fan-out writes land in the object store last
//! - **Clean teardown**: drop works from any live status and is idempotent
//!
//! ## Quick Start
//!
//! ```ignore
//! use shardvault::{ClassSchema, DataType, Index, IndexConfig, ShardingState, StoredObject};
//! use tokio_util::sync::CancellationToken;
//!
//! let schema = ClassSchema::new("Article").with_property("title", DataType::Text);
//! let index = Index::new(IndexConfig::new("/data", "Article"), ShardingState::single("s0"), schema).await?;
//!
//! let ctx = CancellationToken::new();
//! let object = StoredObject::new("Article", id).with_vector(embedding).with_property("title", "hello");
//! index.put_object(&ctx, object).await?;
//! let found = index.object_by_id(&ctx, &id).await?;
//! index.drop_index().await?;
//! ```

pub mod config;
pub mod defaults;
pub mod error;
pub mod index;
pub mod inverted;
pub mod object;
pub mod objects;
pub mod schema;
pub mod shard;
pub mod storage;
pub mod vector_index;
pub mod vectors;
pub mod wal;

pub use config::{EngineConfig, IndexConfig};
pub use defaults::*;
pub use error::{Result, VaultError};
pub use index::Index;
pub use inverted::{LogPropertyIndex, PropertyIndex};
pub use object::{Properties, PropertyValue, StoredObject};
pub use objects::{LogObjectStore, ObjectStore};
pub use schema::{ClassSchema, DataType, PropertyDef, SchemaProvider, ShardingState, StaticSchema};
pub use shard::{Shard, ShardStatus};
pub use storage::{BlockStorage, LocalBlockStorage, StorageError, StorageResult, SubStore};
pub use vector_index::{DistanceMetric, FlatVectorIndex, VectorIndex, VectorIndexConfig};
