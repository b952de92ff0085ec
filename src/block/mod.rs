//! Block cache
//!
//! Mediates reads of content blocks and index listings from the remote
//! storage. Depending on [`CachingOptions`] the cache is either a
//! pass-through ([`NullBlockCache`]) or backed by local storage
//! ([`LocalStorageCache`]); the choice is made once, at construction.

pub mod key;
pub mod local;
pub mod null;
pub mod options;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, StorageError};
use crate::storage::{BlockMetadata, Storage};

pub use key::derive_cache_key;
pub use local::{sweep, CacheUsage, LocalStorageCache, SweepStats};
pub use null::NullBlockCache;
pub use options::CachingOptions;

/// Id prefix of index blocks in the remote storage
pub const INDEX_BLOCK_PREFIX: &str = "i";

/// Metadata of one index block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    /// Block id in the remote storage
    pub block_id: String,
    /// Size in bytes
    pub length: u64,
    /// Modification timestamp in milliseconds since epoch
    pub timestamp: u64,
}

impl From<BlockMetadata> for IndexInfo {
    fn from(block: BlockMetadata) -> Self {
        Self {
            block_id: block.id,
            length: block.length,
            timestamp: unix_millis(block.timestamp),
        }
    }
}

/// Milliseconds since epoch, saturating at zero for earlier times
pub(crate) fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Block cache in front of the remote storage
#[derive(Debug)]
pub enum BlockCache {
    /// Caching disabled; everything goes to the remote storage
    Disabled(NullBlockCache),
    /// Blocks and listings cached in local storage
    Local(LocalStorageCache),
}

impl BlockCache {
    /// Create the block cache selected by `options`
    ///
    /// Returns the pass-through variant unless both a cache directory and a
    /// size budget are configured.
    pub async fn new(remote: Arc<dyn Storage>, options: &CachingOptions) -> Result<Self, CacheError> {
        match &options.cache_directory {
            Some(dir) if options.is_enabled() => {
                let cache = LocalStorageCache::open(remote, dir, options).await?;
                Ok(BlockCache::Local(cache))
            }
            _ => {
                debug!("Block cache disabled");
                Ok(BlockCache::Disabled(NullBlockCache::new(remote)))
            }
        }
    }

    /// Whether blocks are cached locally
    pub fn is_enabled(&self) -> bool {
        matches!(self, BlockCache::Local(_))
    }

    /// Read a content block
    ///
    /// # Arguments
    /// * `cache_key` - Cache identity of the requested bytes
    /// * `physical_id` - Remote block holding the bytes
    /// * `offset` - Offset within the remote block
    /// * `length` - Bytes to read, `None` for the rest of the block
    pub async fn get_content_block(
        &self,
        cache_key: &str,
        physical_id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>, StorageError> {
        match self {
            BlockCache::Disabled(cache) => cache.get_content_block(physical_id, offset, length).await,
            BlockCache::Local(cache) => {
                cache
                    .get_content_block(cache_key, physical_id, offset, length)
                    .await
            }
        }
    }

    /// List index blocks
    pub async fn list_index_blocks(&self) -> Result<Vec<IndexInfo>, StorageError> {
        match self {
            BlockCache::Disabled(cache) => cache.list_index_blocks().await,
            BlockCache::Local(cache) => cache.list_index_blocks().await,
        }
    }

    /// Forget the cached index listing
    pub async fn delete_list_cache(&self) -> Result<(), StorageError> {
        match self {
            BlockCache::Disabled(_) => Ok(()),
            BlockCache::Local(cache) => cache.delete_list_cache().await,
        }
    }

    /// Stop background maintenance
    pub async fn close(&self) {
        if let BlockCache::Local(cache) = self {
            cache.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_zero_budget_selects_disabled_cache() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryStorage::new());
        remote.put("p01", b"0123456789").await.unwrap();
        remote.put("i01", b"index").await.unwrap();

        let options = CachingOptions::new()
            .with_cache_directory(dir.path())
            .with_max_cache_size(0);
        let cache = BlockCache::new(remote.clone(), &options).await.unwrap();

        assert!(!cache.is_enabled());
        // No cache directory layout is created
        assert!(!dir.path().join(local::BLOCKS_SUBDIRECTORY).exists());

        assert_eq!(cache.get_content_block("k", "p01", 3, Some(2)).await.unwrap(), b"34");
        assert_eq!(cache.get_content_block("k", "p01", 3, Some(2)).await.unwrap(), b"34");
        assert_eq!(remote.get_count(), 2);

        let listed = cache.list_index_blocks().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].block_id, "i01");

        cache.delete_list_cache().await.unwrap();
        cache.close().await;
        assert_eq!(remote.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_directory_selects_disabled_cache() {
        let remote = Arc::new(MemoryStorage::new());
        let options = CachingOptions::new().with_max_cache_size(1 << 20);
        let cache = BlockCache::new(remote, &options).await.unwrap();
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn test_configured_cache_is_local() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MemoryStorage::new());
        remote.put("p01", b"0123456789").await.unwrap();

        let options = CachingOptions::new()
            .with_cache_directory(dir.path())
            .with_max_cache_size(1 << 20)
            .with_list_cache_duration(300)
            .with_hmac_secret(b"secret".to_vec());
        let cache = BlockCache::new(remote.clone(), &options).await.unwrap();
        assert!(cache.is_enabled());

        cache.get_content_block("blk", "p01", 0, None).await.unwrap();
        cache.get_content_block("blk", "p01", 0, None).await.unwrap();
        assert_eq!(remote.get_count(), 1);

        cache.list_index_blocks().await.unwrap();
        cache.delete_list_cache().await.unwrap();
        cache.list_index_blocks().await.unwrap();
        assert_eq!(remote.list_count(), 2);

        cache.close().await;
    }

    #[test]
    fn test_index_info_from_metadata() {
        let info = IndexInfo::from(BlockMetadata {
            id: "i42".to_string(),
            length: 7,
            timestamp: UNIX_EPOCH + std::time::Duration::from_millis(1536964279000),
        });
        assert_eq!(info.block_id, "i42");
        assert_eq!(info.length, 7);
        assert_eq!(info.timestamp, 1536964279000);

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains(r#""blockId":"i42""#));
    }
}
