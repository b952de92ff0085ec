//! Local caching layer for a deduplicating backup client
//!
//! Two independent caches sit between the client and slow remote storage:
//!
//! - [`BlockCache`] keeps content blocks and the index-block listing in a
//!   local directory, bounded by a size budget that a background task
//!   enforces.
//! - [`DirectoryCache`] keeps recently read directory listings in memory,
//!   bounded by directory count and total entry count.

pub mod block;
pub mod error;
pub mod fs;
pub mod fscache;
mod stats;
pub mod storage;

pub use block::{BlockCache, CachingOptions, IndexInfo};
pub use error::{CacheError, FsError, StorageError};
pub use fs::{DirEntry, Directory, Entries, EntryKind, ObjectId};
pub use fscache::DirectoryCache;
pub use storage::{BlockMetadata, FilesystemStorage, MemoryStorage, Storage};
