//! Local Filesystem Storage
//!
//! Stores each block as one file under a root directory. Files are spread
//! over shard subdirectories named after leading characters of the block id
//! (shards `[2]` puts `abcdef` at `<root>/ab/abcdef`) so that no single
//! directory grows too large.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use super::{slice_range, validate_id, BlockMetadata, Storage};
use crate::error::StorageError;

/// Prefix of in-flight temp files created by [`tempfile`]
const TEMP_PREFIX: &str = ".tmp";

/// Block storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    /// Root directory for stored blocks
    root: PathBuf,
    /// Lengths of the id prefixes used as nested shard directories
    shards: Vec<usize>,
}

impl FilesystemStorage {
    /// Open storage rooted at an existing directory
    ///
    /// # Arguments
    /// * `root` - Directory holding the blocks (must already exist)
    /// * `shards` - Id prefix lengths used for nested shard directories
    pub fn open(root: impl Into<PathBuf>, shards: Vec<usize>) -> Result<Self, StorageError> {
        let root = root.into();
        let metadata = fs::metadata(&root).map_err(|source| StorageError::Io {
            path: root.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::Backend(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let storage = Self { root, shards };

        // Clean up any stale temp files from previous runs
        storage.cleanup();

        debug!(root = %storage.root.display(), shards = ?storage.shards, "Filesystem storage opened");
        Ok(storage)
    }

    /// Root directory of this storage
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a block id to its file path
    fn path_for(&self, id: &str) -> PathBuf {
        let mut path = self.root.clone();
        let mut start = 0;
        for &len in &self.shards {
            let end = start + len;
            if end >= id.len() {
                break;
            }
            path.push(&id[start..end]);
            start = end;
        }
        path.push(id);
        path
    }

    fn read_sync(&self, id: &str, offset: u64, length: Option<u64>) -> Result<Vec<u8>, StorageError> {
        validate_id(id)?;
        let path = self.path_for(id);
        let data = fs::read(&path).map_err(|e| StorageError::from_io(id, &path, e))?;
        slice_range(id, &data, offset, length)
    }

    fn write_sync(&self, id: &str, data: &[u8]) -> Result<(), StorageError> {
        validate_id(id)?;
        let path = self.path_for(id);

        // Ensure parent directory exists
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|source| StorageError::Io {
            path: parent.clone(),
            source,
        })?;

        // Write atomically using tempfile
        let io_err = |source| StorageError::Io {
            path: path.clone(),
            source,
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&parent)
            .map_err(io_err)?;
        tmp.write_all(data).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        trace!(id = id, size = data.len(), "Stored block");
        Ok(())
    }

    fn delete_sync(&self, id: &str) -> Result<(), StorageError> {
        validate_id(id)?;
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn list_sync(&self, prefix: &str) -> Result<Vec<BlockMetadata>, StorageError> {
        let mut blocks = Vec::new();
        self.walk(&self.root, 0, &mut |path, metadata| {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return;
            };
            if !name.starts_with(prefix) || validate_id(name).is_err() {
                return;
            }
            blocks.push(BlockMetadata {
                id: name.to_string(),
                length: metadata.len(),
                timestamp: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
            });
        })?;
        Ok(blocks)
    }

    /// Visit every regular file below `dir`, descending through shard levels
    fn walk(
        &self,
        dir: &Path,
        depth: usize,
        visit: &mut dyn FnMut(&Path, &fs::Metadata),
    ) -> Result<(), StorageError> {
        let read_dir = fs::read_dir(dir).map_err(|source| StorageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in read_dir.flatten() {
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // Removed concurrently
                Err(_) => continue,
            };
            if metadata.is_dir() {
                if depth < self.shards.len() {
                    self.walk(&path, depth + 1, visit)?;
                }
            } else if metadata.is_file() {
                visit(&path, &metadata);
            }
        }
        Ok(())
    }

    /// Remove temp files left behind by interrupted writes
    pub fn cleanup(&self) {
        let walked = self.walk(&self.root, 0, &mut |path, _| {
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(TEMP_PREFIX));
            if is_temp {
                debug!(path = %path.display(), "Removing stale temp file");
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale temp file");
                }
            }
        });
        if let Err(e) = walked {
            warn!(root = %self.root.display(), error = %e, "Failed to scan for stale temp files");
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(FilesystemStorage) -> Result<T, StorageError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| StorageError::Backend(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn get(&self, id: &str, offset: u64, length: Option<u64>) -> Result<Vec<u8>, StorageError> {
        let id = id.to_string();
        self.blocking(move |s| s.read_sync(&id, offset, length)).await
    }

    async fn put(&self, id: &str, data: &[u8]) -> Result<(), StorageError> {
        let id = id.to_string();
        let data = data.to_vec();
        self.blocking(move |s| s.write_sync(&id, &data)).await
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let id = id.to_string();
        self.blocking(move |s| s.delete_sync(&id)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlockMetadata>, StorageError> {
        let prefix = prefix.to_string();
        self.blocking(move |s| s.list_sync(&prefix)).await
    }
}
