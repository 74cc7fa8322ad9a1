//! Exhaustive-search vector index
//!
//! Vectors live in the memory-mapped arena (`vectors.bin`); the mapping from
//! object id to arena slot is a record log (`vectors.ids`). Replacing a
//! vector writes a free slot and repoints the id. The slot it leaves behind
//! is free once the new mapping is durable, so the arena never outgrows the
//! peak number of live vectors by more than the writes in flight.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::config::{DistanceMetric, VectorIndexConfig};
use super::r#trait::VectorIndex;
use crate::defaults::{VECTORS_FILE, VECTOR_IDS_FILE};
use crate::storage::{BlockStorage, StorageError, StorageResult, SubStore};
use crate::vectors::VectorStore;
use crate::wal::entry::kind;
use crate::wal::RecordLog;

pub struct FlatVectorIndex {
    vectors: VectorStore,
    ids: RecordLog,
    slots: RwLock<HashMap<Uuid, u32>>,
    /// Arena slots no id resolves to
    free: Mutex<Vec<u32>>,
    distance: DistanceMetric,
}

impl std::fmt::Debug for FlatVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatVectorIndex")
            .field("len", &self.len())
            .field("dims", &self.vectors.dims())
            .field("distance", &self.distance)
            .finish()
    }
}

impl FlatVectorIndex {
    /// Open or create the index files below `dir`
    pub async fn open(
        storage: Arc<dyn BlockStorage>,
        dir: &str,
        config: &VectorIndexConfig,
    ) -> StorageResult<Self> {
        let vectors = VectorStore::open(storage.clone(), format!("{}/{}", dir, VECTORS_FILE)).await?;
        let (ids, entries) = RecordLog::open(storage, format!("{}/{}", dir, VECTOR_IDS_FILE)).await?;

        let mut slots = HashMap::new();
        for (_, entry) in entries {
            match entry.kind {
                kind::PUT => {
                    let slot = entry
                        .payload
                        .get(..4)
                        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                    match slot {
                        Some(slot) if (slot as u64) < vectors.count() => {
                            slots.insert(entry.key, slot);
                        }
                        _ => {
                            tracing::warn!(id = %entry.key, "skipping vector id entry without arena slot");
                        }
                    }
                }
                kind::DELETE => {
                    slots.remove(&entry.key);
                }
                other => {
                    tracing::warn!(kind = other, "unknown vector id entry kind");
                }
            }
        }

        let used: HashSet<u32> = slots.values().copied().collect();
        let free = (0..vectors.count() as u32)
            .rev()
            .filter(|slot| !used.contains(slot))
            .collect();

        Ok(Self {
            vectors,
            ids,
            slots: RwLock::new(slots),
            free: Mutex::new(free),
            distance: config.distance,
        })
    }

    pub fn distance(&self) -> DistanceMetric {
        self.distance
    }
}

#[async_trait]
impl SubStore for FlatVectorIndex {
    async fn flush(&self) -> StorageResult<()> {
        self.vectors.sync().await?;
        self.ids.sync().await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.ids.close().await?;
        self.vectors.close().await
    }

    async fn wipe(&self) -> StorageResult<()> {
        self.ids.delete().await?;
        self.vectors.delete().await?;
        self.slots.write().clear();
        Ok(())
    }

    fn artifacts(&self) -> Vec<String> {
        vec![self.vectors.path().to_string(), self.ids.path().to_string()]
    }

    fn kind_name(&self) -> &'static str {
        "flat"
    }
}

#[async_trait]
impl VectorIndex for FlatVectorIndex {
    async fn insert(&self, id: Uuid, vector: &[f32]) -> StorageResult<()> {
        if self.ids.is_closed() {
            return Err(StorageError::closed(self.ids.path()));
        }

        let reused = self.free.lock().pop();
        let slot = match reused {
            Some(slot) => match self.vectors.overwrite(slot, vector).await {
                Ok(()) => slot,
                Err(e) => {
                    self.free.lock().push(slot);
                    return Err(e);
                }
            },
            None => self.vectors.append(vector).await?,
        };

        if let Err(e) = self
            .ids
            .append(kind::PUT, id, slot.to_le_bytes().to_vec())
            .await
        {
            self.free.lock().push(slot);
            return Err(e.into());
        }

        let replaced = self.slots.write().insert(id, slot);
        if let Some(old) = replaced {
            self.free.lock().push(old);
        }
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> StorageResult<bool> {
        if !self.slots.read().contains_key(id) {
            return Ok(false);
        }
        self.ids.append(kind::DELETE, *id, Vec::new()).await?;

        let removed = self.slots.write().remove(id);
        match removed {
            Some(slot) => {
                self.free.lock().push(slot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get(&self, id: &Uuid) -> Option<Vec<f32>> {
        // Hold the mapping so the slot cannot be freed and rewritten meanwhile
        let slots = self.slots.read();
        self.vectors.get(*slots.get(id)?)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        if k == 0 || self.dims() != Some(query.len()) {
            return Vec::new();
        }

        let slots = self.slots.read();
        let mut results: Vec<(Uuid, f32)> = slots
            .iter()
            .filter_map(|(id, &slot)| {
                self.vectors
                    .get(slot)
                    .map(|v| (*id, self.distance.distance(query, &v)))
            })
            .collect();

        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        results.truncate(k);
        results
    }

    fn dims(&self) -> Option<usize> {
        match self.vectors.dims() {
            0 => None,
            dims => Some(dims),
        }
    }

    fn len(&self) -> usize {
        self.slots.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBlockStorage;

    async fn open_index(storage: Arc<dyn BlockStorage>) -> FlatVectorIndex {
        FlatVectorIndex::open(storage, "shard", &VectorIndexConfig::new(DistanceMetric::L2Squared))
            .await
            .unwrap()
    }

    fn temp_storage() -> (tempfile::TempDir, Arc<dyn BlockStorage>) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn BlockStorage> = Arc::new(LocalBlockStorage::new(dir.path()).unwrap());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_empty_index_creates_two_artifacts() {
        let (_dir, storage) = temp_storage();
        let index = open_index(storage.clone()).await;

        assert!(index.is_empty());
        assert_eq!(index.dims(), None);
        for path in index.artifacts() {
            assert!(storage.exists(&path).await.unwrap(), "{} missing", path);
        }
        assert_eq!(index.artifacts().len(), 2);
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let (_dir, storage) = temp_storage();
        let index = open_index(storage).await;

        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index.insert(far, &[10.0, 10.0]).await.unwrap();
        index.insert(near, &[1.0, 1.0]).await.unwrap();

        let results = index.search(&[0.0, 0.0], 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, near);
        assert_eq!(results[1].0, far);

        assert_eq!(index.search(&[0.0, 0.0], 1).len(), 1);
        assert!(index.search(&[0.0, 0.0, 0.0], 10).is_empty());
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let (_dir, storage) = temp_storage();
        let index = open_index(storage).await;

        let id = Uuid::new_v4();
        index.insert(id, &[1.0, 2.0]).await.unwrap();
        index.insert(id, &[3.0, 4.0]).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&id).unwrap(), vec![3.0, 4.0]);

        assert!(index.delete(&id).await.unwrap());
        assert!(!index.delete(&id).await.unwrap());
        assert!(index.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_reopen_restores_mapping() {
        let (_dir, storage) = temp_storage();
        let kept = Uuid::new_v4();
        let removed = Uuid::new_v4();
        {
            let index = open_index(storage.clone()).await;
            index.insert(kept, &[0.1, 0.2, 0.01, 0.2]).await.unwrap();
            index.insert(removed, &[0.3, 0.2, 0.01, 0.2]).await.unwrap();
            index.delete(&removed).await.unwrap();
            index.close().await.unwrap();
        }

        let index = open_index(storage).await;
        assert_eq!(index.len(), 1);
        assert_eq!(index.dims(), Some(4));
        assert_eq!(index.get(&kept).unwrap(), vec![0.1, 0.2, 0.01, 0.2]);
        assert!(index.get(&removed).is_none());
    }

    #[tokio::test]
    async fn test_wipe_removes_files() {
        let (_dir, storage) = temp_storage();
        let index = open_index(storage.clone()).await;
        index.insert(Uuid::new_v4(), &[1.0]).await.unwrap();

        index.wipe().await.unwrap();
        for path in index.artifacts() {
            assert!(!storage.exists(&path).await.unwrap());
        }
        assert!(index.insert(Uuid::new_v4(), &[1.0]).await.is_err());

        // Idempotent
        index.wipe().await.unwrap();
    }

    #[tokio::test]
    async fn test_released_slots_are_reused() {
        let (_dir, storage) = temp_storage();
        let index = open_index(storage.clone()).await;

        let id = Uuid::new_v4();
        for i in 0..50 {
            index.insert(id, &[i as f32, 1.0]).await.unwrap();
        }
        let other = Uuid::new_v4();
        index.insert(other, &[9.0, 9.0]).await.unwrap();
        index.delete(&other).await.unwrap();
        index.insert(other, &[8.0, 8.0]).await.unwrap();

        assert_eq!(index.get(&id).unwrap(), vec![49.0, 1.0]);
        assert_eq!(index.get(&other).unwrap(), vec![8.0, 8.0]);
        // Two live vectors, two slots
        assert_eq!(storage.size("shard/vectors.bin").await.unwrap(), 64 + 2 * 2 * 4);

        index.close().await.unwrap();
        let index = open_index(storage).await;
        assert_eq!(index.get(&id).unwrap(), vec![49.0, 1.0]);
        assert_eq!(index.get(&other).unwrap(), vec![8.0, 8.0]);
        assert_eq!(index.len(), 2);
    }
}
