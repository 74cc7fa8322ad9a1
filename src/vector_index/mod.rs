//! Vector index abstraction layer
//!
//! A shard talks to its vector index only through the [`VectorIndex`] trait,
//! so the structure behind it can be substituted without touching the write
//! path:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   Shard                      │
//! │  ┌────────────────────────────────────────┐ │
//! │  │         Arc<dyn VectorIndex>           │ │
//! │  │  ┌──────────────────────────────────┐  │ │
//! │  │  │ FlatVectorIndex                  │  │ │
//! │  │  │ vectors.bin (arena) + vectors.ids│  │ │
//! │  │  └──────────────────────────────────┘  │ │
//! │  └────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────┘
//! ```

mod config;
mod flat;
mod r#trait;

pub use config::{DistanceMetric, VectorIndexConfig};
pub use flat::FlatVectorIndex;
pub use r#trait::VectorIndex;

use std::sync::Arc;

use crate::storage::{BlockStorage, StorageResult};

/// Open (or create) the vector index of a shard directory
pub async fn open_vector_index(
    config: &VectorIndexConfig,
    storage: Arc<dyn BlockStorage>,
    dir: &str,
) -> StorageResult<Arc<dyn VectorIndex>> {
    let index = FlatVectorIndex::open(storage, dir, config).await?;
    tracing::debug!(dir, index_type = config.index_type_name(), "vector index opened");
    Ok(Arc::new(index))
}
