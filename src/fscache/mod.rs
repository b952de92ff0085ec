//! Directory Listing Cache
//!
//! In-memory cache of directory listings keyed by the directory's
//! content-derived identifier. Bounded both by the number of cached
//! directories and by the total number of entries across them; the least
//! recently used listing is evicted first. Entries also expire after a
//! per-insert duration.
//!
//! A single mutex guards the whole cache and is held while the loader runs,
//! so concurrent misses for the same directory load it only once.

mod list;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::FsError;
use crate::fs::{DirEntry, Directory, Entries};
use crate::stats::hit_stats;
use list::{AccessList, Handle};

/// Default maximum number of cached directories
pub const DEFAULT_MAX_DIRECTORIES: usize = 1000;

/// Default maximum number of entries across all cached directories
pub const DEFAULT_MAX_DIRECTORY_ENTRIES: usize = 100_000;

/// How long [`DirectoryCache::readdir`] keeps a listing: 24 hours
pub const DIRECTORY_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct CacheEntry {
    id: String,
    /// `None` if the expiration is too far out to represent
    expire_after: Option<Instant>,
    entries: Entries,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expire_after.is_some_and(|at| now >= at)
    }
}

#[derive(Debug)]
struct Inner {
    index: HashMap<String, Handle>,
    /// Cached listings, most recently used first
    list: AccessList<CacheEntry>,
    /// Sum of entry counts over all cached listings
    total_directory_entries: usize,
}

impl Inner {
    fn remove_entry(&mut self, handle: Handle) {
        if let Some(entry) = self.list.remove(handle) {
            self.total_directory_entries -= entry.entries.len();
            self.index.remove(&entry.id);
        }
    }
}

/// Cache of recently read directory listings
#[derive(Debug)]
pub struct DirectoryCache {
    inner: Mutex<Inner>,
    max_directories: usize,
    max_directory_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DirectoryCache {
    /// Create a cache with the default limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_DIRECTORIES, DEFAULT_MAX_DIRECTORY_ENTRIES)
    }

    /// Create a cache with custom limits
    ///
    /// # Arguments
    /// * `max_directories` - Maximum number of cached directories
    /// * `max_directory_entries` - Maximum number of entries across cached directories
    pub fn with_limits(max_directories: usize, max_directory_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: HashMap::new(),
                list: AccessList::new(),
                total_directory_entries: 0,
            }),
            max_directories,
            max_directory_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The loader runs before any mutation, so a panicking loader
        // leaves the cache consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// List a directory, caching the result if it has a stable identifier
    pub fn readdir<D>(&self, dir: &D) -> Result<Entries, FsError>
    where
        D: Directory + ?Sized,
    {
        match dir.object_id() {
            Some(id) => self.get_entries(id.as_str(), DIRECTORY_EXPIRATION, || dir.readdir()),
            None => dir.readdir().map(Entries::from),
        }
    }

    /// Return the cached listing for `id` or load, cache and return it
    ///
    /// # Arguments
    /// * `id` - Content-derived identifier of the directory
    /// * `expiration` - How long a freshly loaded listing stays valid
    /// * `loader` - Produces the listing on a miss
    ///
    /// Loader errors are returned as-is and nothing is cached. A listing
    /// larger than the entry budget is returned without being cached.
    pub fn get_entries<F, E>(&self, id: &str, expiration: Duration, loader: F) -> Result<Entries, E>
    where
        F: FnOnce() -> Result<Vec<DirEntry>, E>,
    {
        if id.is_empty() {
            return loader().map(Entries::from);
        }

        let mut inner = self.lock();
        let now = Instant::now();

        if let Some(&handle) = inner.index.get(id) {
            let cached = inner
                .list
                .get(handle)
                .map(|entry| (entry.is_expired(now), entry.expire_after, Entries::clone(&entry.entries)));

            match cached {
                Some((false, expire_after, entries)) => {
                    inner.list.move_to_front(handle);
                    drop(inner);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(id = id, valid_until = ?expire_after, "Directory cache HIT");
                    return Ok(entries);
                }
                Some((true, expire_after, _)) => {
                    debug!(id = id, expired_at = ?expire_after, "Removing expired directory cache entry");
                    inner.remove_entry(handle);
                }
                None => {}
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(id = id, "Directory cache MISS");

        let entries = Entries::from(loader()?);

        if entries.len() > self.max_directory_entries {
            // Would never fit, not worth emptying the cache for
            debug!(
                id = id,
                entries = entries.len(),
                max = self.max_directory_entries,
                "Directory listing too large to cache"
            );
            return Ok(entries);
        }

        let handle = inner.list.push_front(CacheEntry {
            id: id.to_string(),
            expire_after: Instant::now().checked_add(expiration),
            entries: Entries::clone(&entries),
        });
        inner.index.insert(id.to_string(), handle);
        inner.total_directory_entries += entries.len();

        while inner.total_directory_entries > self.max_directory_entries
            || inner.index.len() > self.max_directories
        {
            let Some(tail) = inner.list.back() else {
                break;
            };
            if let Some(evicted) = inner.list.get(tail) {
                trace!(id = %evicted.id, entries = evicted.entries.len(), "Evicting directory listing");
            }
            inner.remove_entry(tail);
        }

        debug!(id = id, entries = entries.len(), "Cached directory listing");
        Ok(entries)
    }

    /// Number of cached directories
    pub fn len(&self) -> usize {
        self.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries across all cached directories
    pub fn total_entries(&self) -> usize {
        self.lock().total_directory_entries
    }

    /// Whether `id` is cached, without affecting its recency
    pub fn contains(&self, id: &str) -> bool {
        self.lock().index.contains_key(id)
    }

    /// Drop all cached listings
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.index.clear();
        inner.list = AccessList::new();
        inner.total_directory_entries = 0;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Cleared directory cache");
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
        let (directories, entries) = {
            let inner = self.lock();
            (inner.index.len(), inner.total_directory_entries)
        };

        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            directories = directories,
            entries = entries,
            "Directory cache metrics"
        );
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// [`DirectoryCache::get_entries`] for an optional cache
///
/// Without a cache the loader is called every time.
pub fn get_entries<F, E>(
    cache: Option<&DirectoryCache>,
    id: &str,
    expiration: Duration,
    loader: F,
) -> Result<Entries, E>
where
    F: FnOnce() -> Result<Vec<DirEntry>, E>,
{
    match cache {
        Some(cache) => cache.get_entries(id, expiration, loader),
        None => loader().map(Entries::from),
    }
}

/// [`DirectoryCache::readdir`] for an optional cache
pub fn readdir<D>(cache: Option<&DirectoryCache>, dir: &D) -> Result<Entries, FsError>
where
    D: Directory + ?Sized,
{
    match cache {
        Some(cache) => cache.readdir(dir),
        None => dir.readdir().map(Entries::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ObjectId;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    const HOUR: Duration = Duration::from_secs(3600);

    fn listing(n: usize) -> Vec<DirEntry> {
        (0..n).map(|i| DirEntry::file(format!("file{i}"), i as u64)).collect()
    }

    fn insert(cache: &DirectoryCache, id: &str, n: usize) -> Entries {
        cache
            .get_entries(id, HOUR, || Ok::<_, FsError>(listing(n)))
            .unwrap()
    }

    fn assert_invariants(cache: &DirectoryCache) {
        let inner = cache.lock();
        let sum: usize = inner.list.iter().map(|e| e.entries.len()).sum();
        assert_eq!(inner.total_directory_entries, sum);
        assert_eq!(inner.index.len(), inner.list.len());
        assert!(inner.total_directory_entries <= cache.max_directory_entries);
        assert!(inner.index.len() <= cache.max_directories);
        for entry in inner.list.iter() {
            assert!(inner.index.contains_key(&entry.id));
        }
    }

    /// Ids from most to least recently used
    fn order(cache: &DirectoryCache) -> Vec<String> {
        cache.lock().list.iter().map(|e| e.id.clone()).collect()
    }

    #[test]
    fn test_hit_returns_cached_listing() {
        let cache = DirectoryCache::new();
        let calls = AtomicUsize::new(0);
        let load = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FsError>(listing(3))
        };

        let first = cache.get_entries("k1", HOUR, load).unwrap();
        let second = cache.get_entries("k1", HOUR, load).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second.len(), 3);

        let (hits, misses, hit_rate) = cache.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!(hit_rate > 49.0 && hit_rate < 51.0);
    }

    #[test]
    fn test_expired_entry_is_reloaded() {
        let cache = DirectoryCache::new();
        let calls = AtomicUsize::new(0);
        let load = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FsError>(listing(2))
        };

        cache.get_entries("k1", Duration::ZERO, load).unwrap();
        assert_eq!(cache.total_entries(), 2);

        cache.get_entries("k1", HOUR, load).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Expired entry replaced, not duplicated
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_entries(), 2);
        assert_invariants(&cache);

        cache.get_entries("k1", HOUR, load).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expiration_counts_from_insertion() {
        let cache = DirectoryCache::new();
        let calls = AtomicUsize::new(0);
        let slow_load = || {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(80));
            Ok::<_, FsError>(listing(1))
        };

        let expiration = Duration::from_millis(50);
        cache.get_entries("slow", expiration, slow_load).unwrap();
        cache.get_entries("slow", expiration, slow_load).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().0, 1);
    }

    #[test]
    fn test_lookup_promotes_entry() {
        let cache = DirectoryCache::with_limits(3, 100);
        insert(&cache, "a", 1);
        insert(&cache, "b", 1);
        insert(&cache, "c", 1);
        assert_eq!(order(&cache), vec!["c", "b", "a"]);

        insert(&cache, "a", 1);
        assert_eq!(order(&cache), vec!["a", "c", "b"]);

        insert(&cache, "d", 1);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_invariants(&cache);
    }

    #[test]
    fn test_entry_budget_evicts_least_recent() {
        let cache = DirectoryCache::with_limits(5, 10);
        insert(&cache, "d1", 4);
        insert(&cache, "d2", 4);
        insert(&cache, "d3", 4);

        assert!(!cache.contains("d1"));
        assert!(cache.contains("d2"));
        assert!(cache.contains("d3"));
        assert_eq!(cache.total_entries(), 8);
        assert_eq!(cache.len(), 2);
        assert_invariants(&cache);
    }

    #[test]
    fn test_new_entry_survives_eviction() {
        let cache = DirectoryCache::with_limits(10, 10);
        insert(&cache, "a", 3);
        insert(&cache, "b", 3);
        insert(&cache, "c", 3);

        insert(&cache, "big", 10);

        assert_eq!(order(&cache), vec!["big"]);
        assert_eq!(cache.total_entries(), 10);
        assert_invariants(&cache);
    }

    #[test]
    fn test_oversized_listing_not_cached() {
        let cache = DirectoryCache::with_limits(10, 5);
        insert(&cache, "small", 2);

        let big = insert(&cache, "big", 6);
        assert_eq!(big.len(), 6);
        assert!(!cache.contains("big"));
        assert!(cache.contains("small"));
        assert_eq!(cache.total_entries(), 2);

        let calls = AtomicUsize::new(0);
        cache
            .get_entries("big", HOUR, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FsError>(listing(6))
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_loader_error_caches_nothing() {
        let cache = DirectoryCache::new();
        insert(&cache, "a", 2);

        let result = cache.get_entries("b", HOUR, || Err(FsError::NotFound("b".to_string())));
        assert!(matches!(result, Err(FsError::NotFound(_))));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_entries(), 2);
        assert_invariants(&cache);
    }

    #[test]
    fn test_empty_id_bypasses_cache() {
        let cache = DirectoryCache::new();
        insert(&cache, "", 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invariants_hold_across_inserts() {
        let cache = DirectoryCache::with_limits(7, 40);
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let id = format!("dir{}", (seed >> 33) % 15);
            let size = ((seed >> 17) % 12) as usize;
            insert(&cache, &id, size);
            assert_invariants(&cache);
        }
    }

    #[test]
    fn test_clear() {
        let cache = DirectoryCache::new();
        insert(&cache, "a", 2);
        insert(&cache, "a", 2);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.total_entries(), 0);
        assert_eq!(cache.stats().0, 0);
        insert(&cache, "b", 1);
        assert_invariants(&cache);
    }

    #[test]
    fn test_concurrent_misses_load_once() {
        let cache = DirectoryCache::new();
        let calls = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    cache
                        .get_entries("shared", HOUR, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok::<_, FsError>(listing(3))
                        })
                        .unwrap()
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), (3, 1, 75.0));
    }

    struct TestDirectory {
        id: Option<ObjectId>,
        reads: AtomicUsize,
    }

    impl TestDirectory {
        fn new(id: Option<&str>) -> Self {
            Self {
                id: id.map(ObjectId::new),
                reads: AtomicUsize::new(0),
            }
        }
    }

    impl Directory for TestDirectory {
        fn readdir(&self) -> Result<Vec<DirEntry>, FsError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                DirEntry::file("a.txt", 1),
                DirEntry::directory("sub", Some(ObjectId::new("k-sub"))),
            ])
        }

        fn object_id(&self) -> Option<ObjectId> {
            self.id.clone()
        }
    }

    #[test]
    fn test_readdir_caches_identified_directories() {
        let cache = DirectoryCache::new();
        let dir = TestDirectory::new(Some("k-root"));

        let first = cache.readdir(&dir).unwrap();
        let second = cache.readdir(&dir).unwrap();

        assert_eq!(dir.reads.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(first[0].name, "a.txt");
        assert!(cache.contains("k-root"));
    }

    #[test]
    fn test_readdir_without_id_is_never_cached() {
        let cache = DirectoryCache::new();
        let dir = TestDirectory::new(None);

        cache.readdir(&dir).unwrap();
        cache.readdir(&dir).unwrap();

        assert_eq!(dir.reads.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_optional_cache_helpers() {
        let dir = TestDirectory::new(Some("k-root"));
        readdir(None, &dir).unwrap();
        readdir(None, &dir).unwrap();
        assert_eq!(dir.reads.load(Ordering::SeqCst), 2);

        let cache = DirectoryCache::new();
        readdir(Some(&cache), &dir).unwrap();
        readdir(Some(&cache), &dir).unwrap();
        assert_eq!(dir.reads.load(Ordering::SeqCst), 3);

        let loaded = get_entries(None, "k", HOUR, || Ok::<_, FsError>(listing(2))).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_dyn_directory() {
        let cache = DirectoryCache::new();
        let dir: Box<dyn Directory> = Box::new(TestDirectory::new(Some("k-dyn")));
        cache.readdir(dir.as_ref()).unwrap();
        assert!(cache.contains("k-dyn"));
    }
}
