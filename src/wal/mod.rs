//! Record log
//!
//! Append-only, CRC-framed log that backs every shard sub-store:
//! - Entries are written atomically and fsynced before acknowledgment
//! - CRC32 detects corruption during replay
//! - A torn tail is cut off on open so later appends stay replayable
//! - A failed append is cut off before the next one is accepted
//! - Logs dominated by superseded records are compacted on open

pub mod entry;
pub mod reader;

use crate::defaults::LOG_COMPACT_MIN_ENTRIES;
use crate::storage::{BlockStorage, StorageError};
use entry::{kind, LogEntry, WalError, LOG_HEADER_SIZE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Location of an appended entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub sequence: u64,
    /// Byte offset of the entry header
    pub offset: u64,
}

impl Appended {
    /// Byte offset of the entry payload
    pub fn payload_offset(&self) -> u64 {
        self.offset + LOG_HEADER_SIZE as u64
    }
}

/// Append-only record log
pub struct RecordLog {
    storage: Arc<dyn BlockStorage>,
    path: String,
    next_sequence: AtomicU64,
    /// Length of the acknowledged prefix of the file
    end: AtomicU64,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RecordLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLog")
            .field("path", &self.path)
            .field("sequence", &self.current_sequence())
            .finish()
    }
}

impl RecordLog {
    /// Open or create a log, returning it together with every valid entry
    /// and the offset each entry starts at.
    pub async fn open(
        storage: Arc<dyn BlockStorage>,
        path: impl Into<String>,
    ) -> Result<(Self, Vec<(u64, LogEntry)>), WalError> {
        let path = path.into();

        // Leftover of a compaction interrupted before its rename
        let compact_path = compact_path(&path);
        if storage.exists(&compact_path).await? {
            storage.delete(&compact_path).await?;
        }

        let (entries, end) = if storage.exists(&path).await? {
            let data = storage.read(&path).await?;
            let replay = reader::replay_from_bytes(&data);
            if replay.has_torn_tail() {
                tracing::warn!(
                    path = %path,
                    valid_len = replay.valid_len,
                    file_len = replay.file_len,
                    "truncating torn log tail"
                );
                storage.truncate(&path, replay.valid_len).await?;
            }
            (replay.entries, replay.valid_len)
        } else {
            // Create empty file
            storage.write(&path, &[]).await?;
            storage.sync(&path).await?;
            (Vec::new(), 0)
        };

        let next_sequence = entries
            .iter()
            .map(|(_, e)| e.sequence)
            .max()
            .map_or(1, |last| last + 1);

        let live = live_entries(&entries);
        let dead = entries.len() - live.len();
        let (entries, end) = if entries.len() >= LOG_COMPACT_MIN_ENTRIES && dead * 2 >= entries.len() {
            match rewrite(&*storage, &path, live).await {
                Ok((compacted, len)) => {
                    tracing::info!(path = %path, dropped = dead, kept = compacted.len(), "compacted log");
                    (compacted, len)
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "log compaction failed, keeping full log");
                    let _ = storage.delete(&compact_path).await;
                    (entries, end)
                }
            }
        } else {
            (entries, end)
        };

        Ok((
            Self {
                storage,
                path,
                next_sequence: AtomicU64::new(next_sequence),
                end: AtomicU64::new(end),
                write_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            },
            entries,
        ))
    }

    /// Append a single entry
    ///
    /// GUARANTEE: When this returns Ok, the entry is durable on disk
    pub async fn append(&self, kind: u8, key: Uuid, payload: Vec<u8>) -> Result<Appended, WalError> {
        let mut appended = self.append_batch(vec![LogEntry::new(kind, key, payload)]).await?;
        appended.pop().ok_or(WalError::TruncatedEntry)
    }

    /// Append multiple entries with a single write and a single fsync
    pub async fn append_batch(&self, entries: Vec<LogEntry>) -> Result<Vec<Appended>, WalError> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.write_lock.lock().await;

        let start_sequence = self
            .next_sequence
            .fetch_add(entries.len() as u64, Ordering::SeqCst);

        let mut buffer = Vec::new();
        let mut relative = Vec::with_capacity(entries.len());
        for (i, mut entry) in entries.into_iter().enumerate() {
            entry.sequence = start_sequence + i as u64;
            relative.push((entry.sequence, buffer.len() as u64));
            buffer.extend(entry.serialize());
        }

        let end = self.end.load(Ordering::SeqCst);
        let written = async {
            let base = self.storage.append(&self.path, &buffer).await?;
            // CRITICAL: fsync to ensure durability
            self.storage.sync(&self.path).await?;
            Ok::<u64, StorageError>(base)
        }
        .await;

        let base = match written {
            Ok(base) => base,
            Err(e) => {
                self.discard_tail(end).await;
                return Err(e.into());
            }
        };
        self.end.store(base + buffer.len() as u64, Ordering::SeqCst);

        Ok(relative
            .into_iter()
            .map(|(sequence, offset)| Appended {
                sequence,
                offset: base + offset,
            })
            .collect())
    }

    /// Read `len` payload bytes starting at `payload_offset`
    pub async fn read_payload(&self, payload_offset: u64, len: usize) -> Result<Vec<u8>, WalError> {
        self.ensure_open()?;
        Ok(self
            .storage
            .read_range(&self.path, payload_offset, len)
            .await?)
    }

    /// Get current sequence number (last written)
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Replay all entries from the log
    pub async fn replay_all(&self) -> Result<Vec<LogEntry>, WalError> {
        let replay = reader::replay_log(&*self.storage, &self.path).await?;
        Ok(replay.entries.into_iter().map(|(_, e)| e).collect())
    }

    /// Sync the log file
    pub async fn sync(&self) -> Result<(), WalError> {
        if self.is_closed() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        Ok(self.storage.sync(&self.path).await?)
    }

    /// Stop accepting appends. The file is left in place.
    pub async fn close(&self) -> Result<(), WalError> {
        let _guard = self.write_lock.lock().await;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.storage.sync(&self.path).await?;
        }
        Ok(())
    }

    /// Close and delete the log file
    pub async fn delete(&self) -> Result<(), WalError> {
        let _guard = self.write_lock.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        Ok(self.storage.delete(&self.path).await?)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get log file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get log file size
    pub async fn size(&self) -> Result<u64, WalError> {
        Ok(self.storage.size(&self.path).await?)
    }

    fn ensure_open(&self) -> Result<(), WalError> {
        if self.is_closed() {
            return Err(WalError::Closed(self.path.clone()));
        }
        Ok(())
    }

    /// Cut whatever a failed append left past `end`. A log whose tail cannot
    /// be cut stops accepting appends.
    async fn discard_tail(&self, end: u64) {
        if let Err(e) = self.storage.truncate(&self.path, end).await {
            tracing::error!(path = %self.path, error = %e, "cannot cut failed append, closing log");
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

fn compact_path(path: &str) -> String {
    format!("{}.compact", path)
}

/// Every declaration plus the last put of each key not deleted since, in log
/// order
fn live_entries(entries: &[(u64, LogEntry)]) -> Vec<LogEntry> {
    let mut last = HashMap::new();
    for (i, (_, entry)) in entries.iter().enumerate() {
        if entry.kind == kind::PUT || entry.kind == kind::DELETE {
            last.insert(entry.key, i);
        }
    }

    entries
        .iter()
        .enumerate()
        .filter(|(i, (_, entry))| match entry.kind {
            kind::PUT => last.get(&entry.key) == Some(i),
            kind::DELETE => false,
            _ => true,
        })
        .map(|(_, (_, entry))| entry.clone())
        .collect()
}

/// Replace the log at `path` with `live`, returning the new offsets and length
async fn rewrite(
    storage: &dyn BlockStorage,
    path: &str,
    live: Vec<LogEntry>,
) -> Result<(Vec<(u64, LogEntry)>, u64), WalError> {
    let mut buffer = Vec::new();
    let mut entries = Vec::with_capacity(live.len());
    for entry in live {
        let bytes = entry.serialize();
        entries.push((buffer.len() as u64, entry));
        buffer.extend(bytes);
    }

    let tmp = compact_path(path);
    storage.write(&tmp, &buffer).await?;
    storage.sync(&tmp).await?;
    storage.rename(&tmp, path).await?;

    Ok((entries, buffer.len() as u64))
}
