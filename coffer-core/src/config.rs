//! Configuration for backup engine instances and restore operations
//!
//! This module provides the options structure consumed when opening a
//! backup engine against a destination directory, plus the per-call
//! options accepted by restore operations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options controlling one backup engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEngineOptions {
    /// Destination root; the engine owns everything under this directory
    pub backup_dir: PathBuf,
    /// Store immutable table files once under the shared pool and
    /// reference-count them across backups; false copies every file into
    /// the backup's private directory
    pub share_table_files: bool,
    /// Key the shared pool by `name_checksum_size` under
    /// `shared_checksum/` instead of bare names under `shared/`, making
    /// name reuse across database generations collision-proof
    pub share_files_with_checksum: bool,
    /// Include live WAL files in backups (ignored when a backup flushes
    /// the memtable first, which makes the logs redundant)
    pub backup_log_files: bool,
    /// Ceiling in bytes/sec for backup copies; 0 = unlimited
    pub backup_rate_limit: u64,
    /// Ceiling in bytes/sec for restore copies; 0 = unlimited
    pub restore_rate_limit: u64,
    /// fsync copied files and meta files before their commit rename
    pub sync: bool,
    /// Delete every backup already present when a writable engine opens
    pub destroy_old_data: bool,
}

impl BackupEngineOptions {
    /// Create options for the given destination with defaults: shared
    /// table files keyed by name, WAL files included, fsync on, no rate
    /// limits, existing backups preserved.
    pub fn new<P: Into<PathBuf>>(backup_dir: P) -> Self {
        BackupEngineOptions {
            backup_dir: backup_dir.into(),
            share_table_files: true,
            share_files_with_checksum: false,
            backup_log_files: true,
            backup_rate_limit: 0,
            restore_rate_limit: 0,
            sync: true,
            destroy_old_data: false,
        }
    }

    /// Toggle shared-pool placement of table files
    pub fn with_share_table_files(mut self, share: bool) -> Self {
        self.share_table_files = share;
        self
    }

    /// Toggle content-addressed shared-pool keys
    pub fn with_share_files_with_checksum(mut self, share: bool) -> Self {
        self.share_files_with_checksum = share;
        self
    }

    /// Toggle WAL inclusion
    pub fn with_backup_log_files(mut self, backup: bool) -> Self {
        self.backup_log_files = backup;
        self
    }

    /// Set backup and restore byte-rate ceilings (0 = unlimited)
    pub fn with_rate_limits(mut self, backup: u64, restore: u64) -> Self {
        self.backup_rate_limit = backup;
        self.restore_rate_limit = restore;
        self
    }

    /// Toggle fsync-before-commit
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Request deletion of all pre-existing backups at open
    pub fn with_destroy_old_data(mut self, destroy: bool) -> Self {
        self.destroy_old_data = destroy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.backup_dir.as_os_str().is_empty() {
            return Err(crate::CofferError::validation(
                "backup_dir must not be empty",
            ));
        }
        if self.share_files_with_checksum && !self.share_table_files {
            return Err(crate::CofferError::validation(
                "share_files_with_checksum requires share_table_files",
            ));
        }
        Ok(())
    }
}

/// Per-call options for restore operations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Preserve WAL files already present in the destination instead of
    /// clearing them before the restore copies begin
    pub keep_log_files: bool,
}

impl RestoreOptions {
    /// Restore options that clear the destination completely first
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore options that keep destination WAL files
    pub fn keeping_log_files() -> Self {
        RestoreOptions {
            keep_log_files: true,
        }
    }
}
