//! Error Types
//!
//! Structured errors for storage backends, the block cache engine and
//! directory listings. Storage failures keep their path context so that
//! callers can tell a missing blob from a broken disk.

use std::io;
use std::path::PathBuf;

/// Storage backend error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Block not found: {0}")]
    NotFound(String),

    #[error("Invalid block id: {0:?}")]
    InvalidId(String),

    #[error("Range {offset}+{length:?} is outside block {id} ({size} bytes)")]
    InvalidRange {
        id: String,
        offset: u64,
        length: Option<u64>,
        size: u64,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error means the block does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Wrap an I/O error, mapping `NotFound` to [`StorageError::NotFound`]
    pub(crate) fn from_io(id: &str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(id.to_string())
        } else {
            StorageError::Io {
                path: path.into(),
                source,
            }
        }
    }
}

/// Block cache error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to create cache directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to encode cached listing: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors produced while listing a directory
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("Directory not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
