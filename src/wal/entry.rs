//! Record log entry format
//!
//! Binary format (all little-endian):
//! ┌────────┬────────┬────────┬──────┬──────────┬──────────┬────────┬──────────────┐
//! │ Magic  │ CRC32  │ SeqNo  │ Kind │ Reserved │ Key      │ Length │ Payload      │
//! │ 4 bytes│ 4 bytes│ 8 bytes│ 1    │ 3 bytes  │ 16 bytes │ 4 bytes│ Length bytes │
//! └────────┴────────┴────────┴──────┴──────────┴──────────┴────────┴──────────────┘
//!
//! Total header: 40 bytes. The CRC covers everything after the CRC field.

use crate::storage::StorageError;
use uuid::Uuid;

pub use crate::defaults::{LOG_HEADER_SIZE, LOG_MAGIC};

/// Entry kinds shared by the logs of every sub-store
pub mod kind {
    /// Insert or replace the value of a key
    pub const PUT: u8 = 1;
    /// Tombstone for a key
    pub const DELETE: u8 = 2;
    /// Property declaration (property index only)
    pub const DECLARE: u8 = 3;
}

/// Parsed log entry
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub sequence: u64,
    pub kind: u8,
    pub key: Uuid,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn new(kind: u8, key: Uuid, payload: Vec<u8>) -> Self {
        Self {
            sequence: 0,
            kind,
            key,
            payload,
        }
    }

    /// Serialize entry to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let total_len = LOG_HEADER_SIZE + self.payload.len();
        let mut buffer = vec![0u8; total_len];

        buffer[0..4].copy_from_slice(&LOG_MAGIC.to_le_bytes());
        // bytes 4..8 hold the CRC, filled in last
        buffer[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        buffer[16] = self.kind;
        buffer[20..36].copy_from_slice(self.key.as_bytes());
        buffer[36..40].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buffer[LOG_HEADER_SIZE..].copy_from_slice(&self.payload);

        let crc = crc32fast::hash(&buffer[8..]);
        buffer[4..8].copy_from_slice(&crc.to_le_bytes());

        buffer
    }

    /// Deserialize the entry starting at the beginning of `data`.
    ///
    /// Returns the entry and the number of bytes it occupies.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize), WalError> {
        if data.len() < LOG_HEADER_SIZE {
            return Err(WalError::TruncatedEntry);
        }

        fn to_u32(data: &[u8], start: usize) -> Result<u32, WalError> {
            data.get(start..start + 4)
                .ok_or(WalError::TruncatedEntry)?
                .try_into()
                .map(u32::from_le_bytes)
                .map_err(|_| WalError::TruncatedEntry)
        }

        fn to_u64(data: &[u8], start: usize) -> Result<u64, WalError> {
            data.get(start..start + 8)
                .ok_or(WalError::TruncatedEntry)?
                .try_into()
                .map(u64::from_le_bytes)
                .map_err(|_| WalError::TruncatedEntry)
        }

        let magic = to_u32(data, 0)?;
        if magic != LOG_MAGIC {
            return Err(WalError::InvalidMagic);
        }

        let payload_len = to_u32(data, 36)? as usize;
        let entry_len = LOG_HEADER_SIZE + payload_len;
        if data.len() < entry_len {
            return Err(WalError::TruncatedEntry);
        }

        let stored_crc = to_u32(data, 4)?;
        let expected_crc = crc32fast::hash(&data[8..entry_len]);
        if stored_crc != expected_crc {
            return Err(WalError::ChecksumMismatch);
        }

        let sequence = to_u64(data, 8)?;
        let kind = data[16];
        let key = Uuid::from_slice(&data[20..36]).map_err(|_| WalError::TruncatedEntry)?;

        Ok((
            Self {
                sequence,
                kind,
                key,
                payload: data[LOG_HEADER_SIZE..entry_len].to_vec(),
            },
            entry_len,
        ))
    }

    /// Get the total size of the serialized entry
    pub fn encoded_len(&self) -> usize {
        LOG_HEADER_SIZE + self.payload.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("Invalid log magic number")]
    InvalidMagic,

    #[error("CRC checksum mismatch")]
    ChecksumMismatch,

    #[error("Truncated entry")]
    TruncatedEntry,

    #[error("Log is closed: {0}")]
    Closed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<WalError> for StorageError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Storage(inner) => inner,
            WalError::Io(inner) => StorageError::Io(inner),
            WalError::ChecksumMismatch => StorageError::ChecksumMismatch,
            WalError::Closed(path) => StorageError::Closed { path },
            other => StorageError::Backend(other.to_string()),
        }
    }
}
