//! In-memory storage
//!
//! Keeps blocks in a map. Counts requests so callers can tell whether a
//! read reached the backend at all.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;

use super::{slice_range, BlockMetadata, Storage};
use crate::error::StorageError;

#[derive(Debug, Clone)]
struct StoredBlock {
    data: Vec<u8>,
    timestamp: SystemTime,
}

/// Block storage held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blocks: RwLock<BTreeMap<String, StoredBlock>>,
    gets: AtomicU64,
    lists: AtomicU64,
}

impl MemoryStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block with an explicit modification time
    pub fn put_with_timestamp(&self, id: &str, data: &[u8], timestamp: SystemTime) {
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        blocks.insert(
            id.to_string(),
            StoredBlock {
                data: data.to_vec(),
                timestamp,
            },
        );
    }

    /// Whether block `id` is present
    pub fn contains(&self, id: &str) -> bool {
        let blocks = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        blocks.contains_key(id)
    }

    /// Number of blocks stored
    pub fn len(&self) -> usize {
        let blocks = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        blocks.len()
    }

    /// Whether no blocks are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `get` calls served so far
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `list` calls served so far
    pub fn list_count(&self) -> u64 {
        self.lists.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, id: &str, offset: u64, length: Option<u64>) -> Result<Vec<u8>, StorageError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let blocks = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        let block = blocks
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        slice_range(id, &block.data, offset, length)
    }

    async fn put(&self, id: &str, data: &[u8]) -> Result<(), StorageError> {
        self.put_with_timestamp(id, data, SystemTime::now());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut blocks = self.blocks.write().unwrap_or_else(PoisonError::into_inner);
        blocks.remove(id);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlockMetadata>, StorageError> {
        self.lists.fetch_add(1, Ordering::Relaxed);
        let blocks = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(blocks
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, block)| BlockMetadata {
                id: id.clone(),
                length: block.data.len() as u64,
                timestamp: block.timestamp,
            })
            .collect())
    }
}
