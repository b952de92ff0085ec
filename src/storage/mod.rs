//! Blob storage abstraction
//!
//! The same [`Storage`] trait fronts the authoritative remote store and the
//! local store the block cache persists into.

pub mod filesystem;
pub mod memory;

use std::fmt::Debug;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::StorageError;

pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;

/// Metadata reported for each blob by [`Storage::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMetadata {
    /// Blob identifier
    pub id: String,
    /// Size in bytes
    pub length: u64,
    /// Last modification time
    pub timestamp: SystemTime,
}

/// Key/value blob store
///
/// Implementations are responsible for their own internal synchronization;
/// callers may issue reads, writes, deletes and listings concurrently.
#[async_trait]
pub trait Storage: Debug + Send + Sync {
    /// Read `length` bytes of block `id` starting at `offset`.
    /// `None` reads to the end of the block.
    async fn get(&self, id: &str, offset: u64, length: Option<u64>) -> Result<Vec<u8>, StorageError>;

    /// Store `data` under `id`, replacing any existing block
    async fn put(&self, id: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Remove block `id`. Removing a block that does not exist succeeds.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// List all blocks whose id starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<BlockMetadata>, StorageError>;
}

/// Reject ids that cannot be mapped safely onto a file name
pub(crate) fn validate_id(id: &str) -> Result<(), StorageError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}

/// Cut the requested range out of a full block
pub(crate) fn slice_range(
    id: &str,
    data: &[u8],
    offset: u64,
    length: Option<u64>,
) -> Result<Vec<u8>, StorageError> {
    let size = data.len() as u64;
    let end = match length {
        Some(len) => offset.checked_add(len),
        None => Some(size),
    };

    match end {
        Some(end) if offset <= size && end <= size && offset <= end => {
            Ok(data[offset as usize..end as usize].to_vec())
        }
        _ => Err(StorageError::InvalidRange {
            id: id.to_string(),
            offset,
            length,
            size,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("abc123").is_ok());
        assert!(validate_id("i-0001_x").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id(".tmpXYZ").is_err());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("a/b").is_err());
    }

    #[test]
    fn test_slice_range() {
        let data = b"0123456789";
        assert_eq!(slice_range("b", data, 0, None).unwrap(), data.to_vec());
        assert_eq!(slice_range("b", data, 2, Some(3)).unwrap(), b"234".to_vec());
        assert_eq!(slice_range("b", data, 10, None).unwrap(), Vec::<u8>::new());
        assert_eq!(slice_range("b", data, 7, None).unwrap(), b"789".to_vec());

        assert!(matches!(
            slice_range("b", data, 8, Some(5)),
            Err(StorageError::InvalidRange { size: 10, .. })
        ));
        assert!(slice_range("b", data, 11, None).is_err());
        assert!(slice_range("b", data, 1, Some(u64::MAX)).is_err());
    }
}
