//! Pass-through block cache used when caching is disabled

use std::sync::Arc;

use tracing::trace;

use super::{IndexInfo, INDEX_BLOCK_PREFIX};
use crate::error::StorageError;
use crate::storage::Storage;

/// Block cache that forwards every read to the remote storage
#[derive(Debug, Clone)]
pub struct NullBlockCache {
    remote: Arc<dyn Storage>,
}

impl NullBlockCache {
    pub fn new(remote: Arc<dyn Storage>) -> Self {
        Self { remote }
    }

    pub async fn get_content_block(
        &self,
        physical_id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>, StorageError> {
        trace!(block = physical_id, "Block cache disabled, reading remote");
        self.remote.get(physical_id, offset, length).await
    }

    pub async fn list_index_blocks(&self) -> Result<Vec<IndexInfo>, StorageError> {
        let blocks = self.remote.list(INDEX_BLOCK_PREFIX).await?;
        Ok(blocks.into_iter().map(IndexInfo::from).collect())
    }
}
