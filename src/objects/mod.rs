//! Object store
//!
//! Durable id → blob store. Every put appends the blob to `objects.log` and
//! keeps an in-memory pointer to its payload; reads go straight to disk.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::defaults::OBJECTS_FILE;
use crate::storage::{BlockStorage, StorageError, StorageResult, SubStore};
use crate::wal::entry::kind;
use crate::wal::RecordLog;

/// Durable key → blob store
#[async_trait]
pub trait ObjectStore: SubStore {
    /// Insert or replace the blob stored under `id`
    async fn put(&self, id: Uuid, data: Bytes) -> StorageResult<()>;

    /// Blob stored under `id`, `None` if absent
    async fn get(&self, id: &Uuid) -> StorageResult<Option<Bytes>>;

    /// Remove `id`. Returns whether it was present.
    async fn delete(&self, id: &Uuid) -> StorageResult<bool>;

    fn contains(&self, id: &Uuid) -> bool;

    /// Every live id, in no particular order
    fn ids(&self) -> Vec<Uuid>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Location of a blob inside the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordPointer {
    offset: u64,
    len: usize,
}

/// [`ObjectStore`] backed by a record log
pub struct LogObjectStore {
    log: RecordLog,
    index: RwLock<HashMap<Uuid, RecordPointer>>,
}

impl std::fmt::Debug for LogObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogObjectStore")
            .field("path", &self.log.path())
            .field("len", &self.len())
            .finish()
    }
}

impl LogObjectStore {
    pub async fn open(storage: Arc<dyn BlockStorage>, dir: &str) -> StorageResult<Self> {
        let (log, entries) = RecordLog::open(storage, format!("{}/{}", dir, OBJECTS_FILE)).await?;

        let mut index = HashMap::new();
        for (offset, entry) in entries {
            match entry.kind {
                kind::PUT => {
                    index.insert(
                        entry.key,
                        RecordPointer {
                            offset: offset + crate::defaults::LOG_HEADER_SIZE as u64,
                            len: entry.payload.len(),
                        },
                    );
                }
                kind::DELETE => {
                    index.remove(&entry.key);
                }
                other => tracing::warn!(kind = other, path = %log.path(), "unknown object entry kind"),
            }
        }

        Ok(Self {
            log,
            index: RwLock::new(index),
        })
    }
}

#[async_trait]
impl SubStore for LogObjectStore {
    async fn flush(&self) -> StorageResult<()> {
        Ok(self.log.sync().await?)
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(self.log.close().await?)
    }

    async fn wipe(&self) -> StorageResult<()> {
        self.log.delete().await?;
        self.index.write().clear();
        Ok(())
    }

    fn artifacts(&self) -> Vec<String> {
        vec![self.log.path().to_string()]
    }

    fn kind_name(&self) -> &'static str {
        "log"
    }
}

#[async_trait]
impl ObjectStore for LogObjectStore {
    async fn put(&self, id: Uuid, data: Bytes) -> StorageResult<()> {
        let len = data.len();
        let appended = self.log.append(kind::PUT, id, data.to_vec()).await?;
        self.index.write().insert(
            id,
            RecordPointer {
                offset: appended.payload_offset(),
                len,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> StorageResult<Option<Bytes>> {
        if self.log.is_closed() {
            return Err(StorageError::closed(self.log.path()));
        }
        let pointer = match self.index.read().get(id) {
            Some(pointer) => *pointer,
            None => return Ok(None),
        };
        let data = self.log.read_payload(pointer.offset, pointer.len).await?;
        Ok(Some(Bytes::from(data)))
    }

    async fn delete(&self, id: &Uuid) -> StorageResult<bool> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.log.append(kind::DELETE, *id, Vec::new()).await?;
        Ok(self.index.write().remove(id).is_some())
    }

    fn contains(&self, id: &Uuid) -> bool {
        self.index.read().contains_key(id)
    }

    fn ids(&self) -> Vec<Uuid> {
        self.index.read().keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.index.read().len()
    }
}
