/*!
Filesystem adapters for backup persistence.

This module defines the filesystem abstraction (port) and the local-disk
implementation (adapter). The engine performs every read, write, rename,
and delete through this port, so tests can interpose fault-injecting
wrappers and the crash-consistency story stays independent of the OS.
*/

pub mod local;

use std::io::Read;
use std::path::Path;

use crate::Result;

/// Writable handle returned by [`StorageAdapter::open_write`].
///
/// The handle buffers writes; callers that need durability before an
/// atomic rename call [`WritableFile::sync`] first.
pub trait WritableFile: std::io::Write + Send {
    /// Flush application buffers and fsync the file to durable storage.
    fn sync(&mut self) -> Result<()>;
}

/// Filesystem abstraction consumed by the backup engine.
///
/// Implementations must make `rename` atomic for paths on the same
/// filesystem: the destination either holds its old content or the
/// complete new content, never a mix. Every commit in the engine
/// (meta files, private directories, the latest-backup pointer) relies
/// on that guarantee.
pub trait StorageAdapter {
    /// Open a file for streaming reads.
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Open a file for streaming writes, truncating any existing
    /// content and creating parent directories as needed.
    fn open_write(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    /// Read an entire file into memory.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write an entire file, creating parent directories as needed.
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Atomically rename `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a single file.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory and everything under it.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Create a directory and any missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// List the entry names (not full paths) directly under a directory.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;

    /// Size of a file in bytes.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Whether a file or directory exists at the path.
    fn exists(&self, path: &Path) -> bool;

    /// Current wall-clock time as Unix seconds; injectable so tests can
    /// pin backup timestamps.
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

// Re-export for convenience
pub use local::LocalStorage;
