/*!
Read-only façade over the backup directory.

A [`BackupEngineReadOnly`] lists and restores backups while a writable
engine elsewhere keeps committing new ones; atomic-rename commits
guarantee it never observes a half-written state. Its view is frozen at
open time and scoped by the `LATEST_BACKUP` pointer: committed backups
beyond the pointer are hidden, not deleted, and nothing in the backup
directory is created or renamed. Deletion and garbage collection stay
available for retention housekeeping; creating backups does not.
*/

use std::path::Path;

use crate::config::{BackupEngineOptions, RestoreOptions};
use crate::engine::{BackupEngine, BackupInfo, GcReport};
use crate::storage::StorageAdapter;
use crate::{BackupId, CofferError, Result};

/// Restricted engine exposing only the read and retention surface.
pub struct BackupEngineReadOnly<S: StorageAdapter> {
    inner: BackupEngine<S>,
}

impl<S: StorageAdapter> BackupEngineReadOnly<S> {
    /// Open against an existing backup directory without mutating it:
    /// no directory skeleton is created, no interrupted commit is
    /// cleaned up, and `destroy_old_data` is rejected.
    pub fn open(storage: S, options: BackupEngineOptions) -> Result<Self> {
        options.validate()?;
        if options.destroy_old_data {
            return Err(CofferError::validation(
                "destroy_old_data requires a writable engine",
            ));
        }
        Ok(Self {
            inner: BackupEngine::load(storage, options, true)?,
        })
    }

    /// Committed, non-corrupt backups visible through the pointer at
    /// open time, ascending by ID.
    pub fn get_backup_info(&self) -> Vec<BackupInfo> {
        self.inner.get_backup_info()
    }

    /// IDs excluded at open because their manifest failed to parse or
    /// load-verify.
    pub fn corrupt_backup_ids(&self) -> Vec<BackupId> {
        self.inner.corrupt_backup_ids()
    }

    /// See [`BackupEngine::restore_db_from_backup`].
    pub fn restore_db_from_backup(
        &self,
        id: BackupId,
        db_dir: &Path,
        wal_dir: &Path,
        options: &RestoreOptions,
    ) -> Result<()> {
        self.inner.restore_db_from_backup(id, db_dir, wal_dir, options)
    }

    /// See [`BackupEngine::restore_db_from_latest_backup`].
    pub fn restore_db_from_latest_backup(
        &self,
        db_dir: &Path,
        wal_dir: &Path,
        options: &RestoreOptions,
    ) -> Result<()> {
        self.inner.restore_db_from_latest_backup(db_dir, wal_dir, options)
    }

    /// See [`BackupEngine::delete_backup`]. The only mutation this
    /// façade performs.
    pub fn delete_backup(&mut self, id: BackupId) -> Result<()> {
        self.inner.delete_backup(id)
    }

    /// See [`BackupEngine::garbage_collect`]. Hidden backups'
    /// directories and shared files stay untouched.
    pub fn garbage_collect(&mut self) -> Result<GcReport> {
        self.inner.garbage_collect()
    }
}
