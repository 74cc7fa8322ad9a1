//! Local filesystem block storage
//!
//! Every path handed to the trait is resolved below a single root directory.

use super::*;
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Block storage backed by a directory on the local filesystem
#[derive(Debug)]
pub struct LocalBlockStorage {
    root: PathBuf,
}

impl LocalBlockStorage {
    /// Open storage rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn ensure_parent(full_path: &Path) -> std::io::Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStorage for LocalBlockStorage {
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        // Yield to runtime for cooperative scheduling
        tokio::task::yield_now().await;
        let full_path = self.full_path(path);
        Self::ensure_parent(&full_path)?;

        let mut file = File::create(&full_path)?;
        file.write_all(data)?;

        Ok(())
    }

    async fn write_at(&self, path: &str, offset: usize, data: &[u8]) -> StorageResult<()> {
        tokio::task::yield_now().await;
        let full_path = self.full_path(path);
        Self::ensure_parent(&full_path)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&full_path)?;

        let file_len = file.metadata()?.len() as usize;
        if offset + data.len() > file_len {
            file.set_len((offset + data.len()) as u64)?;
        }

        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;

        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        tokio::task::yield_now().await;
        let full_path = self.full_path(path);
        Self::ensure_parent(&full_path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full_path)?;

        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;

        Ok(offset)
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let full_path = self.full_path(path);
        match fs::read(&full_path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                key: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_range(&self, path: &str, offset: u64, length: usize) -> StorageResult<Vec<u8>> {
        let full_path = self.full_path(path);
        let mut file = match File::open(&full_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    key: path.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        tokio::task::yield_now().await;
        Ok(self.full_path(path).exists())
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        let full_path = self.full_path(path);
        match fs::metadata(&full_path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                key: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn sync(&self, path: &str) -> StorageResult<()> {
        let full_path = self.full_path(path);
        if full_path.exists() {
            let file = File::open(&full_path)?;
            file.sync_all()?;
        }

        Ok(())
    }

    async fn truncate(&self, path: &str, len: u64) -> StorageResult<()> {
        let file = OpenOptions::new().write(true).open(self.full_path(path))?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let target = self.full_path(to);
        fs::rename(self.full_path(from), &target)?;
        // Persist the directory entry as well
        if let Some(parent) = target.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        match fs::remove_file(self.full_path(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let full_path = self.full_path(prefix);
        let mut results = Vec::new();

        if full_path.is_dir() {
            for entry in fs::read_dir(&full_path)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                results.push(format!("{}/{}", prefix.trim_end_matches('/'), name));
            }
        }
        results.sort();

        Ok(results)
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        fs::create_dir_all(self.full_path(path))?;
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> StorageResult<()> {
        match fs::remove_dir_all(self.full_path(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn mmap(&self, path: &str) -> StorageResult<Option<memmap2::Mmap>> {
        let full_path = self.full_path(path);
        if !full_path.exists() {
            return Ok(None);
        }
        let file = File::open(&full_path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        // SAFETY: files below the root are only mutated through this storage.
        // A mapped region is only rewritten while no reader resolves to it,
        // and readers remap before reading past the mapped length.
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
        Ok(Some(mmap))
    }

    fn root_path(&self) -> &Path {
        &self.root
    }
}
