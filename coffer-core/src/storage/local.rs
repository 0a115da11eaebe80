/*!
Local filesystem adapter implementation.
*/

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{StorageAdapter, WritableFile};
use crate::{CofferError, Result};

/// Local filesystem adapter.
///
/// Operates on absolute paths handed over by the engine and creates
/// missing parent directories on write, so callers never have to
/// pre-build the tree below a destination.
///
/// # Example
/// ```no_run
/// use coffer_core::storage::{LocalStorage, StorageAdapter};
/// use std::path::Path;
///
/// let storage = LocalStorage::new();
/// storage.write(Path::new("/var/backups/db1/LATEST_BACKUP"), b"3")?;
/// # Ok::<(), coffer_core::CofferError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    /// Create a new local filesystem adapter
    pub fn new() -> Self {
        Self
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    CofferError::storage(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Buffered file handle with fsync support
struct LocalFile {
    writer: BufWriter<fs::File>,
    path: PathBuf,
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl WritableFile for LocalFile {
    fn sync(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| {
            CofferError::storage(format!("Failed to flush {}: {}", self.path.display(), e))
        })?;
        self.writer.get_ref().sync_all().map_err(|e| {
            CofferError::storage(format!("Failed to sync {}: {}", self.path.display(), e))
        })
    }
}

impl StorageAdapter for LocalStorage {
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(path).map_err(|e| {
            CofferError::storage(format!("Failed to open {} for read: {}", path.display(), e))
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        Self::ensure_parent_dir(path)?;
        let file = fs::File::create(path).map_err(|e| {
            CofferError::storage(format!(
                "Failed to open {} for write: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Box::new(LocalFile {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        }))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| {
            CofferError::storage(format!("Failed to read {}: {}", path.display(), e))
        })
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        Self::ensure_parent_dir(path)?;
        fs::write(path, data).map_err(|e| {
            CofferError::storage(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| {
            CofferError::storage(format!(
                "Failed to rename {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| {
            CofferError::storage(format!("Failed to delete {}: {}", path.display(), e))
        })
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).map_err(|e| {
            CofferError::storage(format!(
                "Failed to delete directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| {
            CofferError::storage(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(path).map_err(|e| {
            CofferError::storage(format!("Failed to list {}: {}", path.display(), e))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                CofferError::storage(format!("Failed to list {}: {}", path.display(), e))
            })?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path).map_err(|e| {
            CofferError::storage(format!("Failed to stat {}: {}", path.display(), e))
        })?;
        Ok(metadata.len())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_whole_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let path = temp_dir.path().join("meta/3");

        let data = b"1692000000\n42\n0\n";
        storage.write(&path, data).unwrap();

        assert!(storage.exists(&path));
        assert_eq!(storage.read(&path).unwrap(), data);
        assert_eq!(storage.file_size(&path).unwrap(), data.len() as u64);

        storage.remove_file(&path).unwrap();
        assert!(!storage.exists(&path));
    }

    #[test]
    fn test_streaming_write_creates_parents_and_syncs() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let path = temp_dir.path().join("private/1.tmp/000007.sst");

        let mut file = storage.open_write(&path).unwrap();
        file.write_all(b"table file bytes").unwrap();
        file.sync().unwrap();
        drop(file);

        let mut reader = storage.open_read(&path).unwrap();
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"table file bytes");
    }

    #[test]
    fn test_rename_replaces_destination() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let tmp = temp_dir.path().join("LATEST_BACKUP.tmp");
        let dst = temp_dir.path().join("LATEST_BACKUP");

        storage.write(&dst, b"2").unwrap();
        storage.write(&tmp, b"3").unwrap();
        storage.rename(&tmp, &dst).unwrap();

        assert_eq!(storage.read(&dst).unwrap(), b"3");
        assert!(!storage.exists(&tmp));
    }

    #[test]
    fn test_list_dir_returns_sorted_names() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let dir = temp_dir.path().join("meta");

        storage.write(&dir.join("2"), b"x").unwrap();
        storage.write(&dir.join("1"), b"x").unwrap();
        storage.write(&dir.join("10"), b"x").unwrap();

        let names = storage.list_dir(&dir).unwrap();
        assert_eq!(names, vec!["1", "10", "2"]);
    }

    #[test]
    fn test_read_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let result = storage.read(&temp_dir.path().join("missing"));
        assert!(result.is_err());
    }
}
