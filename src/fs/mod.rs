//! Directory abstraction consumed by the directory-listing cache

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::FsError;

/// Content-derived identifier of a stored object, e.g. a directory tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File/folder name (not full path)
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    pub modified: SystemTime,
    /// Identifier of the entry's content, if stored
    pub object_id: Option<ObjectId>,
}

impl DirEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            modified: SystemTime::UNIX_EPOCH,
            object_id: None,
        }
    }

    pub fn directory(name: impl Into<String>, object_id: Option<ObjectId>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            object_id,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Directory listing shared between the cache and its readers
pub type Entries = Arc<[DirEntry]>;

/// A directory that can enumerate its entries
pub trait Directory: Send + Sync {
    /// List entries in order
    fn readdir(&self) -> Result<Vec<DirEntry>, FsError>;

    /// Stable content-derived identifier of this directory.
    ///
    /// Directories returning `None` are never cached.
    fn object_id(&self) -> Option<ObjectId> {
        None
    }
}
