//! Configuration module

use crate::defaults::{DEFAULT_LOCK_STRIPES, DEFAULT_ROOT_PATH, DEFAULT_SHARD_COUNT};
use crate::schema::ShardingState;
use crate::vector_index::{DistanceMetric, VectorIndexConfig};
use std::path::PathBuf;

/// Configuration of one class index
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Directory holding one sub-directory per class
    pub root_path: PathBuf,
    pub class_name: String,
    pub vector_index: VectorIndexConfig,
    /// Number of per-identifier write lock stripes in every shard
    pub lock_stripes: usize,
}

impl IndexConfig {
    pub fn new(root_path: impl Into<PathBuf>, class_name: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            class_name: class_name.into(),
            vector_index: VectorIndexConfig::default(),
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }

    pub fn with_vector_index(mut self, vector_index: VectorIndexConfig) -> Self {
        self.vector_index = vector_index;
        self
    }

    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes.max(1);
        self
    }

    /// Directory of the class below the root
    pub fn class_path(&self) -> PathBuf {
        self.root_path.join(&self.class_name)
    }
}

/// Engine configuration read from the environment
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub root_path: PathBuf,
    pub shard_count: usize,
    pub distance: DistanceMetric,
    pub dimensions: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from(DEFAULT_ROOT_PATH),
            shard_count: DEFAULT_SHARD_COUNT,
            distance: DistanceMetric::default(),
            dimensions: None,
        }
    }
}

impl EngineConfig {
    /// Load config from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let distance = match std::env::var("SHARDVAULT_DISTANCE") {
            Ok(v) => v.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            Err(_) => DistanceMetric::default(),
        };

        let shard_count = std::env::var("SHARDVAULT_SHARDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SHARD_COUNT);
        if shard_count == 0 {
            anyhow::bail!("SHARDVAULT_SHARDS must be at least 1");
        }

        Ok(Self {
            root_path: std::env::var("SHARDVAULT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT_PATH)),
            shard_count,
            distance,
            dimensions: std::env::var("SHARDVAULT_DIMS")
                .ok()
                .and_then(|v| v.parse().ok()),
        })
    }

    /// Index configuration for `class` under this engine's root
    pub fn index_config(&self, class: &str) -> IndexConfig {
        let mut vector_index = VectorIndexConfig::new(self.distance);
        vector_index.dimensions = self.dimensions;
        IndexConfig::new(&self.root_path, class).with_vector_index(vector_index)
    }

    /// Shard assignment with `shard_count` shards
    pub fn sharding_state(&self) -> ShardingState {
        ShardingState::with_count(self.shard_count)
    }
}
