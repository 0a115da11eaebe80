/*!
Port for the storage engine being backed up.

The backup engine never opens the database itself; it drives this trait
to pin a consistent set of files, then copies them through a
[`StorageAdapter`](crate::storage::StorageAdapter). Any key-value store
whose on-disk layout follows the table/manifest/WAL convention can
implement it.
*/

use std::path::Path;

use crate::{CofferError, Result};

/// Snapshot of the database's live files while deletions are disabled.
#[derive(Debug, Clone)]
pub struct LiveFiles {
    /// File names relative to the database directory, no leading
    /// separator.
    pub files: Vec<String>,
    /// Length of the manifest's valid prefix. The manifest is append
    /// only and may grow after the snapshot, so only this many bytes
    /// are copied.
    pub manifest_file_size: u64,
}

/// One write-ahead log file reported by the database.
#[derive(Debug, Clone)]
pub struct WalFile {
    /// File name relative to the WAL directory.
    pub relative_path: String,
    /// Alive logs hold writes not yet flushed to tables; archived ones
    /// are already covered and never backed up.
    pub is_alive: bool,
}

/// What a database file is, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Immutable table file, `<number>.sst`
    Table,
    /// Append-only manifest, `MANIFEST-<number>`
    Manifest,
    /// Pointer to the current manifest, `CURRENT`
    Current,
    /// Write-ahead log, `<number>.log`
    WalLog,
}

impl FileKind {
    /// Classify a bare file name. Unrecognized names fail the backup
    /// rather than silently producing an incomplete one.
    pub fn classify(name: &str) -> Result<FileKind> {
        if name == "CURRENT" {
            return Ok(FileKind::Current);
        }
        if let Some(number) = name.strip_prefix("MANIFEST-") {
            if is_decimal(number) {
                return Ok(FileKind::Manifest);
            }
        }
        if let Some(number) = name.strip_suffix(".sst") {
            if is_decimal(number) {
                return Ok(FileKind::Table);
            }
        }
        if let Some(number) = name.strip_suffix(".log") {
            if is_decimal(number) {
                return Ok(FileKind::WalLog);
            }
        }
        Err(CofferError::corruption(format!(
            "Cannot back up unrecognized database file: {}",
            name
        )))
    }

    /// Only immutable table files go into the shared pool. Manifests,
    /// `CURRENT` and logs mutate or reuse names across database
    /// lifetimes and must stay private to one backup.
    pub fn is_shareable(&self) -> bool {
        matches!(self, FileKind::Table)
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// The backup engine's view of a running database.
///
/// Call order during a backup: `flush` (optional), then
/// `disable_file_deletions`, then `live_files`/`wal_files`, then
/// `enable_file_deletions` once every copy finished or failed.
pub trait SourceDatabase {
    /// Directory holding the database's live files; the names in
    /// [`LiveFiles`] resolve against it.
    fn db_dir(&self) -> &Path;

    /// Directory holding the write-ahead logs; the names in [`WalFile`]
    /// resolve against it. May equal [`db_dir`](Self::db_dir).
    fn wal_dir(&self) -> &Path;

    /// Persist memtable contents into table files so the backup can
    /// skip WAL files entirely.
    fn flush(&mut self) -> Result<()>;

    /// Stop the database from deleting files until
    /// [`enable_file_deletions`](Self::enable_file_deletions) is
    /// called.
    fn disable_file_deletions(&mut self) -> Result<()>;

    /// Re-allow file deletions. Must be called even when the backup
    /// failed, so implementations should tolerate being the last step
    /// of an error path.
    fn enable_file_deletions(&mut self) -> Result<()>;

    /// Names and manifest length of all files a consistent snapshot
    /// needs. Only valid while deletions are disabled.
    fn live_files(&mut self) -> Result<LiveFiles>;

    /// The database's WAL files, alive and archived.
    fn wal_files(&mut self) -> Result<Vec<WalFile>>;

    /// Sequence number of the most recent write, recorded in the
    /// backup's manifest for recovery decisions.
    fn latest_sequence_number(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_names() {
        assert_eq!(FileKind::classify("000010.sst").unwrap(), FileKind::Table);
        assert_eq!(
            FileKind::classify("MANIFEST-000004").unwrap(),
            FileKind::Manifest
        );
        assert_eq!(FileKind::classify("CURRENT").unwrap(), FileKind::Current);
        assert_eq!(FileKind::classify("000007.log").unwrap(), FileKind::WalLog);
    }

    #[test]
    fn test_classify_rejects_unrecognized_names() {
        for name in [
            "IDENTITY",
            "MANIFEST-",
            "MANIFEST-00a4",
            ".sst",
            "backup.sst.bak",
            "000010.tmp",
            "",
        ] {
            let err = FileKind::classify(name).unwrap_err();
            assert!(err.is_corruption(), "{:?} for {:?}", err, name);
        }
    }

    #[test]
    fn test_only_tables_are_shareable() {
        assert!(FileKind::Table.is_shareable());
        assert!(!FileKind::Manifest.is_shareable());
        assert!(!FileKind::Current.is_shareable());
        assert!(!FileKind::WalLog.is_shareable());
    }
}
