//! Log replay logic

use super::entry::{LogEntry, WalError};
use crate::storage::BlockStorage;

/// Result of scanning a log file
#[derive(Debug, Default)]
pub struct Replay {
    /// Entries in file order, each paired with its byte offset
    pub entries: Vec<(u64, LogEntry)>,
    /// Length of the valid prefix of the file
    pub valid_len: u64,
    /// Total length of the file as read
    pub file_len: u64,
}

impl Replay {
    /// True when the file ends in bytes that are not a valid entry
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// Replay log entries from storage
pub async fn replay_log(storage: &dyn BlockStorage, path: &str) -> Result<Replay, WalError> {
    if !storage.exists(path).await? {
        return Ok(Replay::default());
    }

    let data = storage.read(path).await?;
    Ok(replay_from_bytes(&data))
}

/// Replay log entries from byte buffer
///
/// Stops at the first entry that is not valid: an invalid magic number marks
/// the end of written data, a checksum mismatch or truncated entry marks a
/// torn write.
pub fn replay_from_bytes(data: &[u8]) -> Replay {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        match LogEntry::deserialize(&data[offset..]) {
            Ok((entry, used)) => {
                entries.push((offset as u64, entry));
                offset += used;
            }
            Err(WalError::InvalidMagic) => break,
            Err(e) => {
                tracing::warn!(offset, error = %e, "log corruption detected, stopping replay");
                break;
            }
        }
    }

    Replay {
        entries,
        valid_len: offset as u64,
        file_len: data.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entries() -> Vec<LogEntry> {
        (1..=3)
            .map(|seq| {
                let mut entry = LogEntry::new(1, Uuid::new_v4(), vec![seq as u8; seq]);
                entry.sequence = seq as u64;
                entry
            })
            .collect()
    }

    #[test]
    fn test_replay_multiple_entries() {
        let entries = entries();
        let mut buffer = Vec::new();
        for entry in &entries {
            buffer.extend(entry.serialize());
        }

        let replay = replay_from_bytes(&buffer);
        assert_eq!(replay.entries.len(), 3);
        assert!(!replay.has_torn_tail());
        assert_eq!(replay.entries[0].0, 0);
        assert_eq!(replay.entries[1].0, entries[0].encoded_len() as u64);
        assert_eq!(replay.entries[2].1, entries[2]);
    }

    #[test]
    fn test_replay_handles_trailing_garbage() {
        let entries = entries();
        let mut buffer = entries[0].serialize();
        let valid = buffer.len() as u64;
        buffer.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);

        let replay = replay_from_bytes(&buffer);
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.valid_len, valid);
        assert!(replay.has_torn_tail());
    }

    #[test]
    fn test_replay_stops_at_torn_entry() {
        let entries = entries();
        let mut buffer = entries[0].serialize();
        let second = entries[1].serialize();
        buffer.extend_from_slice(&second[..second.len() - 1]);

        let replay = replay_from_bytes(&buffer);
        assert_eq!(replay.entries.len(), 1);
        assert!(replay.has_torn_tail());
    }
}
