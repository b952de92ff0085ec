//! Block cache configuration

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between background sweeps: 1 minute
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Configuration of the local block cache
///
/// Caching is enabled only when both a cache directory and a non-zero size
/// budget are set. The ignore flag, the secret and the sweep interval are
/// runtime-only and never serialized.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachingOptions {
    /// Directory holding the cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<PathBuf>,

    /// Size budget of the block cache in bytes
    #[serde(default, rename = "maxCacheSize", skip_serializing_if = "is_zero")]
    pub max_cache_size_bytes: u64,

    /// How long a cached index listing stays fresh, in seconds
    #[serde(
        default,
        rename = "maxListCacheDuration",
        skip_serializing_if = "is_zero"
    )]
    pub max_list_cache_duration_sec: u64,

    /// Drop the cached index listing when the cache is opened
    #[serde(skip)]
    pub ignore_list_cache: bool,

    /// Secret used to derive cache keys and tag cached blobs
    #[serde(skip)]
    pub hmac_secret: Vec<u8>,

    /// Interval between background sweeps
    #[serde(skip, default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

impl CachingOptions {
    /// Options with caching disabled
    pub fn new() -> Self {
        Self {
            cache_directory: None,
            max_cache_size_bytes: 0,
            max_list_cache_duration_sec: 0,
            ignore_list_cache: false,
            hmac_secret: Vec::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Platform cache location, e.g. `~/.cache/repo-cache` on Linux
    pub fn default_cache_directory() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("repo-cache"))
    }

    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(dir.into());
        self
    }

    pub fn with_max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    pub fn with_list_cache_duration(mut self, secs: u64) -> Self {
        self.max_list_cache_duration_sec = secs;
        self
    }

    pub fn with_ignore_list_cache(mut self, ignore: bool) -> Self {
        self.ignore_list_cache = ignore;
        self
    }

    pub fn with_hmac_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.hmac_secret = secret.into();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Whether these options select the local-storage-backed cache
    pub fn is_enabled(&self) -> bool {
        self.max_cache_size_bytes > 0
            && self
                .cache_directory
                .as_ref()
                .is_some_and(|dir| !dir.as_os_str().is_empty())
    }

    /// Max age of a cached index listing
    pub fn list_cache_duration(&self) -> Duration {
        Duration::from_secs(self.max_list_cache_duration_sec)
    }
}

impl Default for CachingOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CachingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingOptions")
            .field("cache_directory", &self.cache_directory)
            .field("max_cache_size_bytes", &self.max_cache_size_bytes)
            .field("max_list_cache_duration_sec", &self.max_list_cache_duration_sec)
            .field("ignore_list_cache", &self.ignore_list_cache)
            .field("hmac_secret", &"<redacted>")
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
