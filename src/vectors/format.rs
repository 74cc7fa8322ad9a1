//! Vector store file format definitions

use crate::defaults::{VECTOR_STORE_HEADER_SIZE, VECTOR_STORE_MAGIC};
use crate::storage::StorageError;

pub const HEADER_SIZE: usize = VECTOR_STORE_HEADER_SIZE;
pub const FORMAT_VERSION: u32 = 1;

/// Arena header. `dims == 0` means no vector has been stored yet and the
/// dimensionality is still open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VectorStoreHeader {
    pub magic: u32,
    pub version: u32,
    pub dims: u32,
    pub count: u64,
}

impl VectorStoreHeader {
    pub fn new(dims: usize, count: u64) -> Self {
        Self {
            magic: VECTOR_STORE_MAGIC,
            version: FORMAT_VERSION,
            dims: dims as u32,
            count,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.dims.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.count.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StorageError::Backend("Vector store header too short".into()));
        }

        let word = |start: usize| [bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]];
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[12..20]);

        let header = Self {
            magic: u32::from_le_bytes(word(0)),
            version: u32::from_le_bytes(word(4)),
            dims: u32::from_le_bytes(word(8)),
            count: u64::from_le_bytes(count),
        };

        if header.magic != VECTOR_STORE_MAGIC {
            return Err(StorageError::Backend("Invalid vector store magic".into()));
        }
        if header.version != FORMAT_VERSION {
            return Err(StorageError::Backend(format!(
                "Unsupported vector store version {}",
                header.version
            )));
        }

        Ok(header)
    }
}
