//! Local-storage-backed block cache
//!
//! Keeps content blocks and the index listing in a [`Storage`] rooted under
//! `<cache dir>/blocks`. A background task sweeps that storage periodically
//! and deletes the least recently modified blobs once the size budget is
//! exceeded.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::key::{append_tag, derive_cache_key, verify_and_strip};
use super::options::{CachingOptions, DEFAULT_SWEEP_INTERVAL};
use super::{unix_millis, IndexInfo, INDEX_BLOCK_PREFIX};
use crate::error::{CacheError, StorageError};
use crate::stats::hit_stats;
use crate::storage::{FilesystemStorage, Storage};

/// Subdirectory of the cache directory holding cached blocks
pub const BLOCKS_SUBDIRECTORY: &str = "blocks";

/// Blob id of the cached index listing
pub const LIST_CACHE_ID: &str = "list";

/// Shard layout of the on-disk cache: one level named after two key characters
pub const CACHE_SHARDS: [usize; 1] = [2];

/// Cached index listing together with the time it was fetched
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedListing {
    /// Milliseconds since epoch
    fetched_at: u64,
    blocks: Vec<IndexInfo>,
}

/// Outcome of one eviction sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Number of blobs found in the cache
    pub scanned: usize,
    /// Total size of the cache before the sweep
    pub total_bytes: u64,
    /// Number of blobs deleted
    pub deleted: usize,
    /// Bytes reclaimed
    pub bytes_reclaimed: u64,
}

/// Blob count and size of the cache storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub blocks: usize,
    pub bytes: u64,
}

/// Block cache persisted in local storage
pub struct LocalStorageCache {
    /// Authoritative block storage
    remote: Arc<dyn Storage>,
    /// Storage used purely as a cache
    cache_storage: Arc<dyn Storage>,
    /// Size budget for `cache_storage`
    max_size_bytes: u64,
    hmac_secret: Vec<u8>,
    list_cache_duration: Duration,
    /// Stops the background sweeper
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocalStorageCache {
    /// Open the cache under `cache_dir`, creating the directory if needed
    ///
    /// Fails if the directory cannot be created, the storage cannot be
    /// opened or the initial sweep fails.
    pub async fn open(
        remote: Arc<dyn Storage>,
        cache_dir: &Path,
        options: &CachingOptions,
    ) -> Result<Self, CacheError> {
        let blocks_dir = cache_dir.join(BLOCKS_SUBDIRECTORY);

        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder
            .create(&blocks_dir)
            .await
            .map_err(|source| CacheError::CreateDirectory {
                path: blocks_dir.clone(),
                source,
            })?;

        // Opening walks the cache tree to clear stale temp files
        let root = blocks_dir.clone();
        let cache_storage =
            tokio::task::spawn_blocking(move || FilesystemStorage::open(root, CACHE_SHARDS.to_vec()))
                .await
                .map_err(|e| StorageError::Backend(format!("storage task failed: {e}")))??;

        info!(
            cache_dir = %blocks_dir.display(),
            max_size_mb = options.max_cache_size_bytes / (1024 * 1024),
            "Block cache initialized"
        );

        Self::with_storage(remote, Arc::new(cache_storage), options).await
    }

    /// Build the cache on top of an already opened cache storage
    pub async fn with_storage(
        remote: Arc<dyn Storage>,
        cache_storage: Arc<dyn Storage>,
        options: &CachingOptions,
    ) -> Result<Self, CacheError> {
        let cache = Self {
            remote,
            cache_storage,
            max_size_bytes: options.max_cache_size_bytes,
            hmac_secret: options.hmac_secret.clone(),
            list_cache_duration: options.list_cache_duration(),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };

        if options.ignore_list_cache {
            cache.delete_list_cache().await?;
        }

        // Never start over budget, even if a previous run left excess behind
        sweep(cache.cache_storage.as_ref(), cache.max_size_bytes).await?;

        let handle = spawn_sweeper(
            Arc::clone(&cache.cache_storage),
            cache.max_size_bytes,
            options.sweep_interval,
            cache.shutdown.clone(),
        );
        *cache.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(cache)
    }

    /// Read a content block, going to the remote storage on a miss
    ///
    /// `cache_key` names the bytes being read, so it must differ for
    /// different ranges of the same physical block. Blocks fetched from the
    /// remote storage are written back to the cache; failing to do so is
    /// logged and does not fail the read.
    pub async fn get_content_block(
        &self,
        cache_key: &str,
        physical_id: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>, StorageError> {
        if let Some(data) = self.cached_content_block(cache_key).await {
            return Ok(data);
        }

        let data = self.remote.get(physical_id, offset, length).await?;

        if let Err(e) = self.put_content_block(cache_key, &data).await {
            warn!(cache_key = cache_key, error = %e, "Unable to write block cache");
        }

        Ok(data)
    }

    /// Look a block up in the cache only. `None` on a miss.
    ///
    /// Unreadable or tampered cache entries count as misses.
    pub async fn cached_content_block(&self, cache_key: &str) -> Option<Vec<u8>> {
        let key = derive_cache_key(&self.hmac_secret, cache_key);

        match self.cache_storage.get(&key, 0, None).await {
            Ok(blob) => match verify_and_strip(&self.hmac_secret, blob) {
                Some(data) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(cache_key = cache_key, size = data.len(), "Block cache HIT");
                    return Some(data);
                }
                None => {
                    warn!(cache_key = cache_key, key = %key, "Cached block failed integrity check");
                }
            },
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(cache_key = cache_key, error = %e, "Unable to read block cache");
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(cache_key = cache_key, "Block cache MISS");
        None
    }

    /// Store a block in the cache under the key derived from `cache_key`
    pub async fn put_content_block(&self, cache_key: &str, data: &[u8]) -> Result<(), StorageError> {
        let key = derive_cache_key(&self.hmac_secret, cache_key);
        self.cache_storage
            .put(&key, &append_tag(&self.hmac_secret, data))
            .await?;
        debug!(cache_key = cache_key, size = data.len(), "Stored block in cache");
        Ok(())
    }

    /// List index blocks, refreshing the cached listing when it is stale
    pub async fn list_index_blocks(&self) -> Result<Vec<IndexInfo>, StorageError> {
        if let Some(blocks) = self.cached_index_blocks().await {
            return Ok(blocks);
        }

        let blocks: Vec<IndexInfo> = self
            .remote
            .list(INDEX_BLOCK_PREFIX)
            .await?
            .into_iter()
            .map(IndexInfo::from)
            .collect();

        if let Err(e) = self.put_index_blocks(&blocks).await {
            warn!(error = %e, "Unable to write index listing cache");
        }

        Ok(blocks)
    }

    /// The cached index listing, if present and younger than the list cache duration
    pub async fn cached_index_blocks(&self) -> Option<Vec<IndexInfo>> {
        let blob = match self.cache_storage.get(LIST_CACHE_ID, 0, None).await {
            Ok(blob) => blob,
            Err(e) => {
                if !e.is_not_found() {
                    warn!(error = %e, "Unable to read index listing cache");
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let listing = verify_and_strip(&self.hmac_secret, blob)
            .and_then(|payload| serde_json::from_slice::<CachedListing>(&payload).ok());
        let Some(listing) = listing else {
            warn!("Ignoring malformed index listing cache");
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let age = Duration::from_millis(unix_millis(SystemTime::now()).saturating_sub(listing.fetched_at));
        if age < self.list_cache_duration {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(blocks = listing.blocks.len(), age_ms = age.as_millis() as u64, "Index listing cache HIT");
            Some(listing.blocks)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(age_ms = age.as_millis() as u64, "Index listing cache stale");
            None
        }
    }

    /// Replace the cached index listing, stamped with the current time
    pub async fn put_index_blocks(&self, blocks: &[IndexInfo]) -> Result<(), CacheError> {
        self.write_list_cache(blocks, SystemTime::now()).await
    }

    async fn write_list_cache(&self, blocks: &[IndexInfo], fetched_at: SystemTime) -> Result<(), CacheError> {
        let listing = CachedListing {
            fetched_at: unix_millis(fetched_at),
            blocks: blocks.to_vec(),
        };
        let payload = serde_json::to_vec(&listing)?;
        self.cache_storage
            .put(LIST_CACHE_ID, &append_tag(&self.hmac_secret, &payload))
            .await?;
        debug!(blocks = blocks.len(), "Cached index listing");
        Ok(())
    }

    /// Remove the cached index listing so the next listing goes remote
    pub async fn delete_list_cache(&self) -> Result<(), StorageError> {
        self.cache_storage.delete(LIST_CACHE_ID).await?;
        debug!("Deleted index listing cache");
        Ok(())
    }

    /// Run one eviction pass now
    pub async fn sweep(&self) -> Result<SweepStats, StorageError> {
        sweep(self.cache_storage.as_ref(), self.max_size_bytes).await
    }

    /// Current blob count and total size of the cache
    pub async fn usage(&self) -> Result<CacheUsage, StorageError> {
        let blocks = self.cache_storage.list("").await?;
        Ok(CacheUsage {
            blocks: blocks.len(),
            bytes: blocks.iter().map(|b| b.length).sum(),
        })
    }

    /// Stop the background sweeper and wait for it to exit
    pub async fn close(&self) {
        self.shutdown.cancel();

        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Block cache sweeper failed");
            }
        }

        debug!("Block cache closed");
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        hit_stats(&self.hits, &self.misses)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            max_size_bytes = self.max_size_bytes,
            "Block cache metrics"
        );
    }
}

impl fmt::Debug for LocalStorageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStorageCache")
            .field("remote", &self.remote)
            .field("cache_storage", &self.cache_storage)
            .field("max_size_bytes", &self.max_size_bytes)
            .field("list_cache_duration", &self.list_cache_duration)
            .finish_non_exhaustive()
    }
}

impl Drop for LocalStorageCache {
    fn drop(&mut self) {
        // The sweeper must not outlive the cache even if close() was skipped
        self.shutdown.cancel();
    }
}

/// Delete the least recently modified blobs until `storage` fits in `max_size_bytes`
///
/// Blobs that fail to delete are logged and skipped.
pub async fn sweep(storage: &dyn Storage, max_size_bytes: u64) -> Result<SweepStats, StorageError> {
    let mut blocks = storage.list("").await?;
    let total_bytes: u64 = blocks.iter().map(|b| b.length).sum();

    let mut stats = SweepStats {
        scanned: blocks.len(),
        total_bytes,
        ..SweepStats::default()
    };

    if total_bytes <= max_size_bytes {
        trace!(total_bytes = total_bytes, max_size_bytes = max_size_bytes, "Block cache within budget");
        return Ok(stats);
    }

    // Oldest first
    blocks.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    let mut remaining = total_bytes;
    for block in blocks {
        if remaining <= max_size_bytes {
            break;
        }
        match storage.delete(&block.id).await {
            Ok(()) => {
                debug!(id = %block.id, size = block.length, "Evicted cached block");
                remaining -= block.length;
                stats.deleted += 1;
                stats.bytes_reclaimed += block.length;
            }
            Err(e) => {
                warn!(id = %block.id, error = %e, "Failed to evict cached block");
            }
        }
    }

    info!(
        total_bytes = total_bytes,
        max_size_bytes = max_size_bytes,
        deleted = stats.deleted,
        reclaimed = stats.bytes_reclaimed,
        "Swept block cache"
    );

    Ok(stats)
}

/// A background task sweeping the cache until `shutdown` is cancelled
fn spawn_sweeper(
    storage: Arc<dyn Storage>,
    max_size_bytes: u64,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        DEFAULT_SWEEP_INTERVAL
    } else {
        interval
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = sweep(storage.as_ref(), max_size_bytes).await {
                        warn!(error = %e, "Block cache sweep failed");
                    }
                }
            }
        }

        debug!("Block cache sweeper stopped");
    })
}
