//! On-disk layout of a shard
//!
//! ```text
//! {root}/{class}/{shard}/
//!   shard.version   JSON marker, written last on init and deleted last on drop
//!   objects.log     object store
//!   inverted.log    property index
//!   vectors.bin     vector arena
//!   vectors.ids     vector id → arena slot
//! ```
//!
//! A shard directory without a version marker is the residue of an
//! interrupted init or drop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults::{
    INVERTED_FILE, OBJECTS_FILE, SHARD_FORMAT_VERSION, SHARD_VERSION_FILE, VECTORS_FILE,
    VECTOR_IDS_FILE,
};
use crate::error::{Result, VaultError};
use crate::storage::BlockStorage;

/// Contents of the version marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMeta {
    pub format_version: u32,
    pub class: String,
    pub shard: String,
    pub created_at: DateTime<Utc>,
}

impl ShardMeta {
    pub fn new(class: &str, shard: &str) -> Self {
        Self {
            format_version: SHARD_FORMAT_VERSION,
            class: class.to_string(),
            shard: shard.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Paths of one shard, relative to the storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    class: String,
    shard: String,
    dir: String,
}

impl ShardLayout {
    pub fn new(class: &str, shard: &str) -> Self {
        Self {
            class: class.to_string(),
            shard: shard.to_string(),
            dir: format!("{}/{}", class, shard),
        }
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn version_path(&self) -> String {
        self.file(SHARD_VERSION_FILE)
    }

    pub fn file(&self, name: &str) -> String {
        format!("{}/{}", self.dir, name)
    }

    /// Sub-store files, in the order a drop removes them
    pub fn data_files(&self) -> Vec<String> {
        [OBJECTS_FILE, INVERTED_FILE, VECTORS_FILE, VECTOR_IDS_FILE]
            .iter()
            .map(|name| self.file(name))
            .collect()
    }

    /// Read the version marker. `Ok(None)` when the marker is absent.
    pub async fn read_meta(&self, storage: &dyn BlockStorage) -> Result<Option<ShardMeta>> {
        let path = self.version_path();
        if !storage.exists(&path).await? {
            return Ok(None);
        }

        let data = storage.read(&path).await?;
        let meta: ShardMeta = serde_json::from_slice(&data).map_err(|e| {
            VaultError::initialization(&self.class, format!("corrupt version marker {}: {}", path, e))
        })?;

        if meta.format_version != SHARD_FORMAT_VERSION {
            return Err(VaultError::initialization(
                &self.class,
                format!(
                    "shard {} has format version {}, expected {}",
                    self.shard, meta.format_version, SHARD_FORMAT_VERSION
                ),
            ));
        }
        if meta.class != self.class || meta.shard != self.shard {
            return Err(VaultError::initialization(
                &self.class,
                format!(
                    "version marker {} belongs to {}/{}",
                    path, meta.class, meta.shard
                ),
            ));
        }

        Ok(Some(meta))
    }

    /// Write and fsync the version marker
    pub async fn write_meta(&self, storage: &dyn BlockStorage) -> Result<ShardMeta> {
        let meta = ShardMeta::new(&self.class, &self.shard);
        let data =
            serde_json::to_vec_pretty(&meta).map_err(|e| VaultError::Serialization(e.to_string()))?;
        let path = self.version_path();
        storage.write(&path, &data).await?;
        storage.sync(&path).await?;
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBlockStorage;

    #[test]
    fn test_paths() {
        let layout = ShardLayout::new("Article", "shard_0");
        assert_eq!(layout.dir(), "Article/shard_0");
        assert_eq!(layout.version_path(), "Article/shard_0/shard.version");
        assert_eq!(layout.data_files().len(), 4);
        assert!(!layout.data_files().contains(&layout.version_path()));
    }

    #[tokio::test]
    async fn test_meta_roundtrip_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlockStorage::new(dir.path()).unwrap();
        let layout = ShardLayout::new("Article", "s1");

        assert!(layout.read_meta(&storage).await.unwrap().is_none());

        let written = layout.write_meta(&storage).await.unwrap();
        assert_eq!(layout.read_meta(&storage).await.unwrap(), Some(written));

        // Same directory read as another shard
        std::fs::create_dir_all(dir.path().join("Article/s2")).unwrap();
        std::fs::copy(
            dir.path().join("Article/s1/shard.version"),
            dir.path().join("Article/s2/shard.version"),
        )
        .unwrap();
        let other = ShardLayout::new("Article", "s2");
        assert!(matches!(
            other.read_meta(&storage).await,
            Err(VaultError::Initialization { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_meta() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalBlockStorage::new(dir.path()).unwrap();
        let layout = ShardLayout::new("Article", "s1");

        storage.write(&layout.version_path(), b"{not json").await.unwrap();
        assert!(matches!(
            layout.read_meta(&storage).await,
            Err(VaultError::Initialization { .. })
        ));
    }
}
