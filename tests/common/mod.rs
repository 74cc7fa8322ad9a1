//! Shared test utilities for shardvault testing
//!
//! This module provides:
//! - Temporary index roots and index construction helpers
//! - Deterministic vector generation
//! - Failing storage wrapper for error injection
//! - On-disk artifact listing

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tempfile::TempDir;

use shardvault::storage::{BlockStorage, StorageError, StorageResult};
use shardvault::{ClassSchema, DataType, Index, IndexConfig, ShardingState, StoredObject};
use uuid::Uuid;

/// Helper to create io::Error for injection
fn io_error(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, msg)
}

/// Create a temporary index root
pub fn temp_root() -> TempDir {
    tempfile::tempdir().unwrap()
}

/// Generate a deterministic vector based on seed
pub fn seeded_vector(dims: usize, seed: u64) -> Vec<f32> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let v: Vec<f32> = (0..dims).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
    normalize(&v)
}

/// Normalize a vector to unit length
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Class schema with a single text property `name`
pub fn named_schema(class: &str) -> ClassSchema {
    ClassSchema::new(class).with_property("name", DataType::Text)
}

/// Object of `class` with the given vector and `name` property
pub fn named_object(class: &str, id: Uuid, name: &str, vector: Vec<f32>) -> StoredObject {
    StoredObject::new(class, id)
        .with_vector(vector)
        .with_property("name", name)
}

/// Construct (or load) an index with `shards` shards below `root`
pub async fn open_index(root: &Path, schema: ClassSchema, shards: usize) -> Index {
    let config = IndexConfig::new(root, schema.name.clone());
    Index::new(config, ShardingState::with_count(shards), schema)
        .await
        .unwrap()
}

/// Random id that `index` routes to `shard`
pub fn id_on(index: &Index, shard: &str) -> Uuid {
    loop {
        let id = Uuid::new_v4();
        if index.sharding_state().shard_for(&id) == Some(shard) {
            return id;
        }
    }
}

/// Every file below `dir`, relative to `dir`, sorted
pub fn list_files(dir: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                let relative = path.strip_prefix(base).unwrap();
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    let mut files = Vec::new();
    walk(dir, dir, &mut files);
    files.sort();
    files
}

/// Files persisted for `class` below `root`
pub fn class_artifacts(root: &Path, class: &str) -> Vec<String> {
    list_files(root)
        .into_iter()
        .filter(|path| path.starts_with(&format!("{}/", class)))
        .collect()
}

/// Failure injection mode for FailingStorage
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FailureMode {
    /// No failures
    None,
    /// Fail all operations
    FailAll,
    /// Fail after N operations
    FailAfterN(u64),
    /// Fail only write operations
    FailWrites,
    /// Fail only sync operations
    FailSync,
    /// Fail only append operations
    FailAppend,
    /// Fail appends to files whose path ends with the given name
    FailAppendTo(&'static str),
    /// Fail file and directory deletion
    FailDelete,
    /// Write the first half of appends to files ending with the given name,
    /// then fail
    PartialAppendTo(&'static str),
    /// Fail syncs of files ending with the given name
    FailSyncTo(&'static str),
}

/// Storage wrapper that can inject failures for testing
pub struct FailingStorage {
    inner: Arc<dyn BlockStorage>,
    failure_mode: Arc<std::sync::RwLock<FailureMode>>,
    operation_count: AtomicU64,
    enabled: AtomicBool,
}

impl FailingStorage {
    pub fn new(inner: Arc<dyn BlockStorage>) -> Self {
        Self {
            inner,
            failure_mode: Arc::new(std::sync::RwLock::new(FailureMode::None)),
            operation_count: AtomicU64::new(0),
            enabled: AtomicBool::new(false),
        }
    }

    /// Set the failure mode
    pub fn set_failure_mode(&self, mode: FailureMode) {
        *self.failure_mode.write().unwrap() = mode;
        self.enabled.store(mode != FailureMode::None, Ordering::SeqCst);
        self.operation_count.store(0, Ordering::SeqCst);
    }

    /// Disable all failures
    pub fn disable_failures(&self) {
        self.set_failure_mode(FailureMode::None);
    }

    /// Check if should fail this operation
    fn should_fail(&self, op_type: &str, path: &str) -> bool {
        if !self.enabled.load(Ordering::SeqCst) {
            return false;
        }

        let count = self.operation_count.fetch_add(1, Ordering::SeqCst);
        let mode = *self.failure_mode.read().unwrap();

        match mode {
            FailureMode::None => false,
            FailureMode::FailAll => true,
            FailureMode::FailAfterN(n) => count >= n,
            FailureMode::FailWrites => op_type == "write",
            FailureMode::FailSync => op_type == "sync",
            FailureMode::FailAppend => op_type == "append",
            FailureMode::FailAppendTo(name) => op_type == "append" && path.ends_with(name),
            FailureMode::FailDelete => op_type == "delete",
            FailureMode::PartialAppendTo(name) => op_type == "append" && path.ends_with(name),
            FailureMode::FailSyncTo(name) => op_type == "sync" && path.ends_with(name),
        }
    }

    /// Get current operation count
    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockStorage for FailingStorage {
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        if self.should_fail("write", path) {
            return Err(StorageError::Io(io_error("Injected write failure")));
        }
        self.inner.write(path, data).await
    }

    async fn write_at(&self, path: &str, offset: usize, data: &[u8]) -> StorageResult<()> {
        if self.should_fail("write", path) {
            return Err(StorageError::Io(io_error("Injected write_at failure")));
        }
        self.inner.write_at(path, offset, data).await
    }

    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        if self.should_fail("append", path) {
            let is_partial = matches!(*self.failure_mode.read().unwrap(), FailureMode::PartialAppendTo(_));
            if is_partial {
                self.inner.append(path, &data[..data.len() / 2]).await?;
                return Err(StorageError::Io(io_error("Injected torn append")));
            }
            return Err(StorageError::Io(io_error("Injected append failure")));
        }
        self.inner.append(path, data).await
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        if self.should_fail("read", path) {
            return Err(StorageError::Io(io_error("Injected read failure")));
        }
        self.inner.read(path).await
    }

    async fn read_range(&self, path: &str, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if self.should_fail("read_range", path) {
            return Err(StorageError::Io(io_error("Injected read_range failure")));
        }
        self.inner.read_range(path, offset, len).await
    }

    async fn sync(&self, path: &str) -> StorageResult<()> {
        if self.should_fail("sync", path) {
            return Err(StorageError::Io(io_error("Injected sync failure")));
        }
        self.inner.sync(path).await
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        self.inner.size(path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.inner.exists(path).await
    }

    async fn truncate(&self, path: &str, len: u64) -> StorageResult<()> {
        self.inner.truncate(path, len).await
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.inner.rename(from, to).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        if self.should_fail("delete", path) {
            return Err(StorageError::Io(io_error("Injected delete failure")));
        }
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        self.inner.create_dir(path).await
    }

    async fn remove_dir(&self, path: &str) -> StorageResult<()> {
        if self.should_fail("delete", path) {
            return Err(StorageError::Io(io_error("Injected remove_dir failure")));
        }
        self.inner.remove_dir(path).await
    }

    fn mmap(&self, path: &str) -> StorageResult<Option<memmap2::Mmap>> {
        self.inner.mmap(path)
    }

    fn root_path(&self) -> &Path {
        self.inner.root_path()
    }
}
