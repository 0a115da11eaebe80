/*!
# Coffer Core

Incremental backup engine for embedded key-value storage engines.

This crate snapshots a live database's on-disk files into a backup
directory, deduplicates immutable table files across backups through a
reference-counted shared pool, verifies integrity with CRC32 checksums,
and supports point-in-time restore, deletion, purging, and garbage
collection of aborted state.

## Architecture

The engine talks to the outside world through two ports:

- [`SourceDatabase`] is the database being backed up: live-file
  enumeration, WAL listing, flush, and the file-deletion disable
  bracket.
- [`StorageAdapter`] is the filesystem: every read, write, rename, and
  delete flows through it, so tests can interpose fault-injecting
  wrappers.

Crash consistency comes from one primitive: everything in flight uses a
`.tmp` path and becomes visible only through an atomic rename. A reader
never observes a half-written manifest, private directory, or
latest-backup pointer.

## Usage

```no_run
use coffer_core::{
    BackupEngine, BackupEngineOptions, LocalStorage, RestoreOptions, Result, SourceDatabase,
};
use std::path::Path;

// `db` implements SourceDatabase for the running database.
fn back_up_and_verify(db: &mut dyn SourceDatabase) -> Result<()> {
    let options = BackupEngineOptions::new("/var/backups/db1");
    let mut engine = BackupEngine::open(LocalStorage::new(), options)?;

    let id = engine.create_new_backup(db, true)?;
    engine.restore_db_from_backup(
        id,
        Path::new("/var/lib/db1-verify"),
        Path::new("/var/lib/db1-verify"),
        &RestoreOptions::new(),
    )
}
```
*/

pub mod config;
pub mod copier;
pub mod engine;
pub mod error;
mod layout;
pub mod metadata;
pub mod readonly;
pub mod registry;
pub mod source;
pub mod storage;

/// Identifier of one backup: a strictly increasing positive integer,
/// assigned as `latest + 1` at creation time and never reused while the
/// engine instance lives.
pub type BackupId = u32;

pub use config::{BackupEngineOptions, RestoreOptions};
pub use engine::{BackupEngine, BackupInfo, GcReport, PurgeReport};
pub use error::{CofferError, Result};
pub use metadata::{BackupMeta, FileEntry};
pub use readonly::BackupEngineReadOnly;
pub use registry::{CopyDecision, SharedFileRegistry};
pub use source::{FileKind, LiveFiles, SourceDatabase, WalFile};
pub use storage::{LocalStorage, StorageAdapter};
