//! Contiguous vector arena with memory mapping
//!
//! File format:
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (64 bytes)                                            │
//! │   magic: u32      = 0x56454353 ("VECS")                      │
//! │   version: u32    = 1                                        │
//! │   dims: u32       = vector dimensions (0 until first append) │
//! │   count: u64      = number of slots                          │
//! │   _reserved: [u8; 44]                                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Slot 0: [f32; dims]                                          │
//! │ Slot 1: [f32; dims]                                          │
//! │ ...                                                          │
//! └──────────────────────────────────────────────────────────────┘
//!
//! The header is updated after the slot data, so a crash mid-append leaves
//! the previous count in place. A slot is only rewritten once its owner
//! released it, see [`VectorStore::overwrite`].

pub mod format;

use crate::storage::{BlockStorage, StorageError, StorageResult};
use format::{VectorStoreHeader, HEADER_SIZE};
use memmap2::Mmap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Memory-mapped vector storage
pub struct VectorStore {
    storage: Arc<dyn BlockStorage>,
    path: String,
    dims: AtomicUsize,
    count: AtomicU64,
    mmap: RwLock<Option<Mmap>>,
    append_lock: Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("path", &self.path)
            .field("dims", &self.dims())
            .field("count", &self.count())
            .finish()
    }
}

impl VectorStore {
    /// Open or create a vector store
    pub async fn open(storage: Arc<dyn BlockStorage>, path: impl Into<String>) -> StorageResult<Self> {
        let path = path.into();

        let (dims, count) = if storage.exists(&path).await? {
            let header_bytes = storage.read_range(&path, 0, HEADER_SIZE).await?;
            let header = VectorStoreHeader::from_bytes(&header_bytes)?;
            let dims = header.dims as usize;

            // Never trust a count that points past the end of the file
            let file_len = storage.size(&path).await?;
            let entry_size = (dims * 4) as u64;
            let stored = if entry_size == 0 {
                0
            } else {
                (file_len.saturating_sub(HEADER_SIZE as u64) / entry_size).min(header.count)
            };
            if stored != header.count {
                tracing::warn!(path = %path, header = header.count, stored, "vector store count exceeds file length");
            }
            (dims, stored)
        } else {
            let header = VectorStoreHeader::new(0, 0);
            storage.write(&path, &header.to_bytes()).await?;
            storage.sync(&path).await?;
            (0, 0)
        };

        let mmap = storage.mmap(&path)?;

        Ok(Self {
            storage,
            path,
            dims: AtomicUsize::new(dims),
            count: AtomicU64::new(count),
            mmap: RwLock::new(mmap),
            append_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Append a vector, returns its slot.
    ///
    /// The first append fixes the dimensionality of the store.
    pub async fn append(&self, vector: &[f32]) -> StorageResult<u32> {
        self.ensure_open()?;
        if vector.is_empty() {
            return Err(StorageError::Backend("Cannot store an empty vector".into()));
        }

        let _guard = self.append_lock.lock().await;

        let dims = match self.dims() {
            0 => vector.len(),
            dims if dims == vector.len() => dims,
            dims => {
                return Err(StorageError::Backend(format!(
                    "Dimension mismatch: store has {}, got {}",
                    dims,
                    vector.len()
                )))
            }
        };

        let index = self.count.load(Ordering::SeqCst);
        let offset = HEADER_SIZE + index as usize * dims * 4;
        self.storage.write_at(&self.path, offset, &encode(vector)).await?;

        let header = VectorStoreHeader::new(dims, index + 1);
        self.storage
            .write_at(&self.path, 0, &header.to_bytes())
            .await?;
        self.storage.sync(&self.path).await?;

        self.dims.store(dims, Ordering::SeqCst);
        self.count.store(index + 1, Ordering::SeqCst);

        u32::try_from(index).map_err(|_| StorageError::Backend("Vector store is full".into()))
    }

    /// Replace the vector of an existing slot.
    ///
    /// The caller guarantees no reader resolves to `slot` until this returns.
    pub async fn overwrite(&self, slot: u32, vector: &[f32]) -> StorageResult<()> {
        self.ensure_open()?;
        let _guard = self.append_lock.lock().await;

        if slot as u64 >= self.count() {
            return Err(StorageError::Backend(format!("Slot {} is past the end of the store", slot)));
        }
        let dims = self.dims();
        if dims != vector.len() {
            return Err(StorageError::Backend(format!(
                "Dimension mismatch: store has {}, got {}",
                dims,
                vector.len()
            )));
        }

        let offset = HEADER_SIZE + slot as usize * dims * 4;
        self.storage.write_at(&self.path, offset, &encode(vector)).await?;
        self.storage.sync(&self.path).await
    }

    /// Get a vector by slot (returns a copy)
    ///
    /// The map is refreshed only when it does not cover the slot yet.
    pub fn get(&self, slot: u32) -> Option<Vec<f32>> {
        let dims = self.dims();
        if dims == 0 || slot as u64 >= self.count() {
            return None;
        }

        let entry_size = dims * 4;
        let offset = HEADER_SIZE + (slot as usize) * entry_size;
        let range = offset..offset + entry_size;

        {
            let mmap = self.mmap.read();
            if let Some(data) = mmap.as_ref().and_then(|m| m.get(range.clone())) {
                return Some(decode(data));
            }
        }

        let mut mmap = self.mmap.write();
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let covered = mmap.as_ref().map_or(false, |m| m.len() >= range.end);
        if !covered {
            match self.storage.mmap(&self.path) {
                Ok(fresh) => *mmap = fresh,
                Err(e) => {
                    tracing::warn!(path = %self.path, error = %e, "cannot map vector store");
                    return None;
                }
            }
        }
        mmap.as_ref()?.get(range).map(decode)
    }

    /// Length of the current memory map
    pub fn mapped_len(&self) -> usize {
        self.mmap.read().as_ref().map_or(0, |m| m.len())
    }

    /// Get number of slots
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Get dimensions (0 while unset)
    pub fn dims(&self) -> usize {
        self.dims.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sync to disk
    pub async fn sync(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.storage.sync(&self.path).await
    }

    /// Release the memory map and stop accepting appends
    pub async fn close(&self) -> StorageResult<()> {
        let _guard = self.append_lock.lock().await;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.storage.sync(&self.path).await?;
        }
        *self.mmap.write() = None;
        Ok(())
    }

    /// Close and delete the arena file
    pub async fn delete(&self) -> StorageResult<()> {
        let _guard = self.append_lock.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        *self.mmap.write() = None;
        self.storage.delete(&self.path).await
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::closed(self.path.clone()));
        }
        Ok(())
    }
}

fn encode(vector: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(vector.len() * 4);
    for &val in vector {
        data.extend_from_slice(&val.to_le_bytes());
    }
    data
}

fn decode(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
