/*!
Backup engine orchestrating the full backup lifecycle.

This module contains the core business logic: creating backups from a
live database, restoring them, deleting and purging old ones, and
garbage-collecting aborted state. It owns the on-disk layout, the
shared-pool refcount registry, and the latest-backup pointer; bytes
move through the checksummed copier and the rate limiters.

A backup progresses `Staging -> Committed -> Deleted`. Staging state
lives under `.tmp` names; the commit is a fixed sequence of atomic
renames (private directory, then manifest, then pointer), so a crash at
any boundary leaves either the previous committed state or the new one,
never a mix.
*/

use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Bound;
use std::path::Path;

use coffer_throttle::RateLimiter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{BackupEngineOptions, RestoreOptions};
use crate::copier;
use crate::layout;
use crate::metadata::{BackupMeta, FileEntry};
use crate::registry::{CopyDecision, SharedFileRegistry};
use crate::source::{FileKind, SourceDatabase};
use crate::storage::StorageAdapter;
use crate::{BackupId, CofferError, Result};

/// Listing entry for one committed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub backup_id: BackupId,
    /// Capture time, Unix seconds
    pub timestamp: i64,
    /// Database sequence number at snapshot time
    pub sequence_number: u64,
    /// Logical byte footprint: sum of all entry sizes
    pub size: u64,
    pub num_files: usize,
    /// Opaque caller-supplied bytes stored with the backup
    pub app_metadata: Option<Vec<u8>>,
}

/// Aggregate result of one [`BackupEngine::garbage_collect`] sweep.
///
/// The sweep is best-effort: per-path delete failures are logged,
/// counted, and do not fail the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub deleted_files: usize,
    pub deleted_dirs: usize,
    pub failures: usize,
}

/// Aggregate result of one [`BackupEngine::purge_old_backups`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub deleted: Vec<BackupId>,
    pub failed: Vec<BackupId>,
}

/// Writable backup engine: the single mutator of one backup directory.
///
/// Exactly one writable engine may mutate a given directory at a time;
/// the crate provides no cross-process lock. Any number of
/// [`BackupEngineReadOnly`](crate::BackupEngineReadOnly) instances and
/// restore operations may run concurrently with a writer, because every
/// commit becomes visible only through an atomic rename.
pub struct BackupEngine<S: StorageAdapter> {
    options: BackupEngineOptions,
    storage: S,
    /// Committed backups, ascending by ID
    backups: BTreeMap<BackupId, BackupMeta>,
    /// Backups whose manifest failed to parse or load-verify; excluded
    /// from listing and restore, deletable explicitly, never
    /// auto-deleted
    corrupt: BTreeMap<BackupId, String>,
    /// Committed backups beyond the latest-backup pointer that a
    /// read-only open hides instead of deleting
    hidden: BTreeMap<BackupId, BackupMeta>,
    registry: SharedFileRegistry,
    latest_backup_id: BackupId,
    backup_limiter: Option<RateLimiter>,
    restore_limiter: Option<RateLimiter>,
}

impl<S: StorageAdapter> BackupEngine<S> {
    /// Open a writable engine against `options.backup_dir`.
    ///
    /// 1. Creates the directory skeleton (`meta/`, `private/`, and the
    ///    shared pool the options select).
    /// 2. Scans `meta/` and loads every decimal-named manifest into the
    ///    committed or corrupt set.
    /// 3. Resolves the `LATEST_BACKUP` pointer; committed backups
    ///    beyond a valid pointer are interrupted commits and are
    ///    deleted.
    /// 4. With `destroy_old_data`, deletes every backup found and
    ///    garbage-collects.
    ///
    /// Open never garbage-collects implicitly: `.tmp` litter from an
    /// aborted create survives until [`garbage_collect`](Self::garbage_collect).
    pub fn open(storage: S, options: BackupEngineOptions) -> Result<Self> {
        options.validate()?;

        storage.create_dir_all(&options.backup_dir)?;
        storage.create_dir_all(&layout::meta_dir(&options.backup_dir))?;
        storage.create_dir_all(&layout::private_root(&options.backup_dir))?;
        let pool = if options.share_files_with_checksum {
            layout::SHARED_CHECKSUM_DIR
        } else {
            layout::SHARED_DIR
        };
        storage.create_dir_all(&options.backup_dir.join(pool))?;

        let mut engine = Self::load(storage, options, false)?;

        if engine.options.destroy_old_data {
            info!("destroying all pre-existing backups at open");
            let doomed: Vec<BackupId> = engine
                .backups
                .keys()
                .chain(engine.corrupt.keys())
                .copied()
                .collect();
            for id in doomed {
                engine.delete_backup(id)?;
            }
            let pointer = layout::latest_backup_path(&engine.options.backup_dir);
            if engine.storage.exists(&pointer) {
                if let Err(err) = engine.storage.remove_file(&pointer) {
                    warn!(error = %err, "could not remove the stale latest-backup pointer");
                }
            }
            engine.garbage_collect()?;
        }

        Ok(engine)
    }

    /// Shared open path for writable and read-only engines: scan the
    /// manifests and resolve the pointer, mutating nothing when
    /// `read_only` is set.
    pub(crate) fn load(storage: S, options: BackupEngineOptions, read_only: bool) -> Result<Self> {
        let backup_limiter =
            (options.backup_rate_limit > 0).then(|| RateLimiter::new(options.backup_rate_limit));
        let restore_limiter =
            (options.restore_rate_limit > 0).then(|| RateLimiter::new(options.restore_rate_limit));

        let mut engine = Self {
            options,
            storage,
            backups: BTreeMap::new(),
            corrupt: BTreeMap::new(),
            hidden: BTreeMap::new(),
            registry: SharedFileRegistry::new(),
            latest_backup_id: 0,
            backup_limiter,
            restore_limiter,
        };
        engine.scan_meta_dir()?;
        engine.resolve_latest(read_only)?;

        info!(
            backups = engine.backups.len(),
            corrupt = engine.corrupt.len(),
            latest_backup_id = engine.latest_backup_id,
            read_only,
            "backup engine opened"
        );
        Ok(engine)
    }

    fn scan_meta_dir(&mut self) -> Result<()> {
        let meta_dir = layout::meta_dir(&self.options.backup_dir);
        if !self.storage.exists(&meta_dir) {
            return Ok(());
        }

        for name in self.storage.list_dir(&meta_dir)? {
            if layout::is_tmp_name(&name) {
                continue;
            }
            let Ok(id) = name.parse::<BackupId>() else {
                debug!(%name, "ignoring non-decimal entry under meta/");
                continue;
            };
            match BackupMeta::load_from_file(&self.storage, &self.options.backup_dir, id) {
                Ok(meta) => match self.register_meta(&meta) {
                    Ok(()) => {
                        self.backups.insert(id, meta);
                    }
                    Err(err) => {
                        warn!(
                            backup_id = id,
                            error = %err,
                            "backup conflicts with the shared pool; excluding it as corrupt"
                        );
                        self.corrupt.insert(id, err.to_string());
                    }
                },
                Err(err) => {
                    warn!(backup_id = id, error = %err, "unusable backup manifest");
                    self.corrupt.insert(id, err.to_string());
                }
            }
        }
        Ok(())
    }

    /// Retain every shared entry of `meta` in the registry, unwinding
    /// the partial retains if one of them collides.
    fn register_meta(&mut self, meta: &BackupMeta) -> Result<()> {
        let mut retained: Vec<&str> = Vec::new();
        for entry in meta.entries().iter().filter(|e| e.is_shared) {
            if let Err(err) =
                self.registry
                    .retain(&entry.relative_path, entry.size, entry.checksum)
            {
                for key in retained {
                    self.registry.release(key);
                }
                return Err(err);
            }
            retained.push(&entry.relative_path);
        }
        Ok(())
    }

    fn resolve_latest(&mut self, read_only: bool) -> Result<()> {
        let pointer = self.read_latest_pointer();
        match pointer {
            Some(id) if self.backups.contains_key(&id) => {
                // Anything committed beyond a valid pointer is an
                // interrupted commit that never became the latest
                // backup.
                let beyond: Vec<BackupId> = self
                    .backups
                    .range((Bound::Excluded(id), Bound::Unbounded))
                    .map(|(b, _)| *b)
                    .collect();
                for b in beyond {
                    if read_only {
                        info!(backup_id = b, "hiding backup beyond the latest-backup pointer");
                        if let Some(meta) = self.backups.remove(&b) {
                            self.hidden.insert(b, meta);
                        }
                    } else {
                        warn!(
                            backup_id = b,
                            "deleting interrupted commit beyond the latest-backup pointer"
                        );
                        self.delete_backup(b)?;
                    }
                }
                self.latest_backup_id = id;
            }
            _ => {
                if pointer.is_some() {
                    warn!("latest-backup pointer names an unknown backup; falling back to scan");
                }
                self.latest_backup_id = self.backups.keys().next_back().copied().unwrap_or(0);
            }
        }

        // Never hand out an ID a corrupt backup still occupies on disk.
        let highest_corrupt = self.corrupt.keys().next_back().copied().unwrap_or(0);
        self.latest_backup_id = self.latest_backup_id.max(highest_corrupt);
        Ok(())
    }

    fn read_latest_pointer(&self) -> Option<BackupId> {
        let path = layout::latest_backup_path(&self.options.backup_dir);
        let raw = self.storage.read(&path).ok()?;
        let text = String::from_utf8(raw).ok()?;
        text.trim().parse().ok()
    }

    fn write_latest_pointer(&self, id: BackupId) -> Result<()> {
        let final_path = layout::latest_backup_path(&self.options.backup_dir);
        let tmp_path = layout::tmp_sibling(&final_path);

        let mut file = self.storage.open_write(&tmp_path)?;
        file.write_all(id.to_string().as_bytes())?;
        if self.options.sync {
            file.sync()?;
        } else {
            file.flush()?;
        }
        drop(file);

        self.storage.rename(&tmp_path, &final_path)
    }

    /// Create a new backup of `db`.
    ///
    /// With `flush_before_backup` the database flushes its memtable
    /// first and WAL files are skipped entirely; otherwise the alive
    /// WAL files are backed up (subject to `backup_log_files`).
    pub fn create_new_backup<D>(&mut self, db: &mut D, flush_before_backup: bool) -> Result<BackupId>
    where
        D: SourceDatabase + ?Sized,
    {
        self.create_new_backup_with_metadata(db, None, flush_before_backup)
    }

    /// Create a new backup carrying opaque application metadata.
    ///
    /// Steps: optional flush, disable the database's file deletions,
    /// enumerate live files, copy shared files through the dedup
    /// registry and private files into the staging directory, then
    /// commit (private dir rename, manifest rename, pointer rename).
    /// File deletions are re-enabled on every exit path. On failure
    /// nothing new becomes visible; staged refcounts are unwound and
    /// `.tmp` litter is left for [`garbage_collect`](Self::garbage_collect).
    pub fn create_new_backup_with_metadata<D>(
        &mut self,
        db: &mut D,
        app_metadata: Option<Vec<u8>>,
        flush_before_backup: bool,
    ) -> Result<BackupId>
    where
        D: SourceDatabase + ?Sized,
    {
        let id = self.latest_backup_id + 1;
        info!(backup_id = id, flush_before_backup, "creating backup");

        if flush_before_backup {
            db.flush()?;
        }

        db.disable_file_deletions()?;
        let mut staged_keys: Vec<String> = Vec::new();
        let result = self
            .stage_backup(db, id, app_metadata, flush_before_backup, &mut staged_keys)
            .and_then(|meta| {
                self.commit_backup(&meta)?;
                Ok(meta)
            });
        let reenable = db.enable_file_deletions();

        match result {
            Ok(meta) => {
                self.latest_backup_id = id;
                info!(
                    backup_id = id,
                    files = meta.num_files(),
                    size = meta.total_size(),
                    sequence_number = meta.sequence_number(),
                    "backup committed"
                );
                self.backups.insert(id, meta);
                reenable.map(|_| id)
            }
            Err(err) => {
                for key in &staged_keys {
                    self.registry.release(key);
                }
                warn!(
                    backup_id = id,
                    error = %err,
                    "backup aborted; staging litter left for garbage collection"
                );
                if let Err(enable_err) = reenable {
                    warn!(error = %enable_err, "re-enabling file deletions failed");
                }
                Err(err)
            }
        }
    }

    fn stage_backup<D>(
        &mut self,
        db: &mut D,
        id: BackupId,
        app_metadata: Option<Vec<u8>>,
        flushed: bool,
        staged_keys: &mut Vec<String>,
    ) -> Result<BackupMeta>
    where
        D: SourceDatabase + ?Sized,
    {
        let live = db.live_files()?;
        let mut meta = BackupMeta::new(id, self.storage.now_unix(), db.latest_sequence_number());
        meta.set_app_metadata(app_metadata);

        let db_dir = db.db_dir().to_path_buf();
        for name in &live.files {
            let kind = FileKind::classify(name)?;
            if kind.is_shareable() && self.options.share_table_files {
                self.stage_shared_file(&mut meta, staged_keys, &db_dir.join(name), name)?;
            } else {
                // The live manifest keeps growing; only its prefix as
                // of enumeration belongs to this backup.
                let limit = (kind == FileKind::Manifest).then_some(live.manifest_file_size);
                self.stage_private_file(&mut meta, id, &db_dir.join(name), name, limit)?;
            }
        }

        if !flushed && self.options.backup_log_files {
            let wal_dir = db.wal_dir().to_path_buf();
            for wal in db.wal_files()? {
                if !wal.is_alive {
                    debug!(file = %wal.relative_path, "skipping archived WAL file");
                    continue;
                }
                self.stage_private_file(
                    &mut meta,
                    id,
                    &wal_dir.join(&wal.relative_path),
                    &wal.relative_path,
                    None,
                )?;
            }
        }

        Ok(meta)
    }

    /// Copy one shared-eligible file, or reference the pooled copy.
    fn stage_shared_file(
        &mut self,
        meta: &mut BackupMeta,
        staged_keys: &mut Vec<String>,
        src: &Path,
        name: &str,
    ) -> Result<()> {
        let (key, mut size, checksum) = if self.options.share_files_with_checksum {
            let scan = copier::compute_checksum(&self.storage, src, None)?;
            (
                layout::shared_checksum_rel(name, scan.checksum, scan.bytes),
                scan.bytes,
                Some(scan.checksum),
            )
        } else {
            let key = layout::shared_rel(name);
            if self.registry.is_referenced(&key) {
                // Live name: the checksum decides between dedup and
                // collision before any byte is written.
                let scan = copier::compute_checksum(&self.storage, src, None)?;
                (key, scan.bytes, Some(scan.checksum))
            } else {
                (key, self.storage.file_size(src)?, None)
            }
        };

        let checksum = match self.registry.decide(&key, size, checksum) {
            CopyDecision::Collision => {
                return Err(CofferError::Collision {
                    path: key,
                    reason: format!(
                        "{name} already exists in the shared pool with different content \
                         and is still referenced by another backup"
                    ),
                });
            }
            CopyDecision::Skip => {
                debug!(%key, "shared file already pooled; skipping copy");
                checksum
            }
            CopyDecision::Copy => {
                let final_path = self.options.backup_dir.join(&key);
                let tmp_path = layout::tmp_sibling(&final_path);
                let outcome = copier::copy_checksummed(
                    &self.storage,
                    src,
                    &tmp_path,
                    self.backup_limiter.as_ref(),
                    None,
                    self.options.sync,
                )?;
                self.storage.rename(&tmp_path, &final_path)?;
                size = outcome.bytes;
                Some(outcome.checksum)
            }
        };

        self.registry.retain(&key, size, checksum)?;
        staged_keys.push(key.clone());
        meta.add_file(FileEntry {
            relative_path: key,
            size,
            checksum,
            is_shared: true,
        });
        Ok(())
    }

    /// Copy one file into the backup's private staging directory.
    fn stage_private_file(
        &mut self,
        meta: &mut BackupMeta,
        id: BackupId,
        src: &Path,
        name: &str,
        size_limit: Option<u64>,
    ) -> Result<()> {
        let dst = layout::private_tmp_dir(&self.options.backup_dir, id).join(name);
        let outcome = copier::copy_checksummed(
            &self.storage,
            src,
            &dst,
            self.backup_limiter.as_ref(),
            size_limit,
            self.options.sync,
        )?;
        meta.add_file(FileEntry {
            relative_path: format!("{}/{id}/{name}", layout::PRIVATE_DIR),
            size: outcome.bytes,
            checksum: Some(outcome.checksum),
            is_shared: false,
        });
        Ok(())
    }

    /// Fixed commit order: private directory, manifest, pointer. Each
    /// step is an atomic rename; a crash between steps leaves a state
    /// the next open resolves (an unreferenced private directory is
    /// GC litter, a committed manifest beyond the pointer is deleted).
    fn commit_backup(&mut self, meta: &BackupMeta) -> Result<()> {
        let tmp_dir = layout::private_tmp_dir(&self.options.backup_dir, meta.id());
        if self.storage.exists(&tmp_dir) {
            self.storage
                .rename(&tmp_dir, &layout::private_dir(&self.options.backup_dir, meta.id()))?;
        }
        meta.store_to_file(&self.storage, &self.options.backup_dir, self.options.sync)?;
        self.write_latest_pointer(meta.id())
    }

    /// Restore backup `id` into `db_dir`/`wal_dir`.
    ///
    /// Every entry's CRC32 is recomputed from the bytes actually copied
    /// and compared to the stored value; the first mismatch aborts with
    /// a content-corruption error naming the entry. The backup
    /// directory itself is never modified here, and a corrupt backup is
    /// reported, not deleted.
    pub fn restore_db_from_backup(
        &self,
        id: BackupId,
        db_dir: &Path,
        wal_dir: &Path,
        options: &RestoreOptions,
    ) -> Result<()> {
        let meta = match self.backups.get(&id) {
            Some(meta) => meta,
            None => {
                return Err(match self.corrupt.get(&id) {
                    Some(reason) => CofferError::corruption(reason.clone()),
                    None => CofferError::BackupNotFound(id),
                });
            }
        };

        info!(
            backup_id = id,
            db_dir = %db_dir.display(),
            keep_log_files = options.keep_log_files,
            "restoring backup"
        );
        self.prepare_restore_destination(db_dir, wal_dir, options)?;

        for entry in meta.entries() {
            let name = layout::restore_file_name(&entry.relative_path);
            let dst = if name.ends_with(".log") {
                wal_dir.join(&name)
            } else {
                db_dir.join(&name)
            };
            let src = self.options.backup_dir.join(&entry.relative_path);
            let outcome = copier::copy_checksummed(
                &self.storage,
                &src,
                &dst,
                self.restore_limiter.as_ref(),
                None,
                self.options.sync,
            )?;
            if let Some(expected) = entry.checksum {
                if outcome.checksum != expected {
                    return Err(CofferError::ChecksumMismatch {
                        path: entry.relative_path.clone(),
                        expected,
                        actual: outcome.checksum,
                    });
                }
            }
        }

        info!(backup_id = id, files = meta.num_files(), "restore complete");
        Ok(())
    }

    fn prepare_restore_destination(
        &self,
        db_dir: &Path,
        wal_dir: &Path,
        options: &RestoreOptions,
    ) -> Result<()> {
        self.storage.create_dir_all(db_dir)?;
        self.storage.create_dir_all(wal_dir)?;

        for name in self.storage.list_dir(db_dir)? {
            if options.keep_log_files && name.ends_with(".log") {
                continue;
            }
            self.storage.remove_file(&db_dir.join(&name))?;
        }
        if !options.keep_log_files && wal_dir != db_dir {
            for name in self.storage.list_dir(wal_dir)? {
                self.storage.remove_file(&wal_dir.join(&name))?;
            }
        }
        Ok(())
    }

    /// Restore the most recent committed backup, resolved through the
    /// `LATEST_BACKUP` pointer or, when the pointer is missing or
    /// stale, the highest committed ID.
    ///
    /// On a checksum mismatch (content corruption) the restore retries
    /// with the next older committed backup; any other error is final.
    /// Structurally corrupt backups never enter the walk because they
    /// were excluded at open.
    pub fn restore_db_from_latest_backup(
        &self,
        db_dir: &Path,
        wal_dir: &Path,
        options: &RestoreOptions,
    ) -> Result<()> {
        let latest = match self.resolve_restorable_latest() {
            Some(id) => id,
            None => return Err(CofferError::BackupNotFound(0)),
        };

        let candidates: Vec<BackupId> = self
            .backups
            .range(..=latest)
            .rev()
            .map(|(id, _)| *id)
            .collect();
        let mut last_err: Option<CofferError> = None;
        for id in candidates {
            match self.restore_db_from_backup(id, db_dir, wal_dir, options) {
                Ok(()) => {
                    if last_err.is_some() {
                        info!(
                            backup_id = id,
                            "restored an older backup after content corruption in newer ones"
                        );
                    }
                    return Ok(());
                }
                Err(err) if err.is_checksum_mismatch() => {
                    warn!(
                        backup_id = id,
                        error = %err,
                        "content corruption; falling back to the next older backup"
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(CofferError::BackupNotFound(latest)))
    }

    fn resolve_restorable_latest(&self) -> Option<BackupId> {
        match self.read_latest_pointer() {
            Some(id) if self.backups.contains_key(&id) => Some(id),
            _ => self.backups.keys().next_back().copied(),
        }
    }

    /// Delete backup `id`: remove its manifest and private directory
    /// and release its shared refcounts. Shared files themselves are
    /// never removed here, only by [`garbage_collect`](Self::garbage_collect)
    /// once nothing references them. Works on corrupt backups too.
    pub fn delete_backup(&mut self, id: BackupId) -> Result<()> {
        if let Some(meta) = self.backups.remove(&id) {
            for entry in meta.entries().iter().filter(|e| e.is_shared) {
                self.registry.release(&entry.relative_path);
            }
        } else if self.corrupt.remove(&id).is_none() {
            return Err(CofferError::BackupNotFound(id));
        }

        let meta_path = layout::meta_path(&self.options.backup_dir, id);
        if self.storage.exists(&meta_path) {
            self.storage.remove_file(&meta_path)?;
        }
        let private_dir = layout::private_dir(&self.options.backup_dir, id);
        if self.storage.exists(&private_dir) {
            self.storage.remove_dir_all(&private_dir)?;
        }

        info!(backup_id = id, "backup deleted");
        Ok(())
    }

    /// Delete all but the `keep_n` newest committed backups, oldest
    /// first. Per-backup failures are logged and reported; the pass
    /// continues.
    pub fn purge_old_backups(&mut self, keep_n: usize) -> Result<PurgeReport> {
        let ids: Vec<BackupId> = self.backups.keys().copied().collect();
        let doomed = ids.len().saturating_sub(keep_n);

        let mut report = PurgeReport::default();
        for id in ids.into_iter().take(doomed) {
            match self.delete_backup(id) {
                Ok(()) => report.deleted.push(id),
                Err(err) => {
                    warn!(backup_id = id, error = %err, "purge could not delete backup");
                    report.failed.push(id);
                }
            }
        }
        info!(deleted = report.deleted.len(), failed = report.failed.len(), "purge finished");
        Ok(report)
    }

    /// Best-effort sweep of everything no committed backup needs:
    /// `.tmp` litter from aborted operations, shared files with zero
    /// refcount, and private directories of unknown backup IDs.
    /// Never touches a file referenced by a committed manifest, and
    /// preserves the directories of corrupt (and, read-only, hidden)
    /// backups.
    pub fn garbage_collect(&mut self) -> Result<GcReport> {
        let mut report = GcReport::default();
        let backup_dir = self.options.backup_dir.clone();

        for pool in [layout::SHARED_DIR, layout::SHARED_CHECKSUM_DIR] {
            let dir = backup_dir.join(pool);
            if !self.storage.exists(&dir) {
                continue;
            }
            for name in self.storage.list_dir(&dir)? {
                let key = format!("{pool}/{name}");
                if layout::is_tmp_name(&name) {
                    self.remove_gc_file(&dir.join(&name), &mut report);
                } else if !self.registry.is_referenced(&key) {
                    if self.remove_gc_file(&dir.join(&name), &mut report) {
                        self.registry.forget(&key);
                    }
                }
            }
        }

        let tmp_pointer = layout::tmp_sibling(&layout::latest_backup_path(&backup_dir));
        if self.storage.exists(&tmp_pointer) {
            self.remove_gc_file(&tmp_pointer, &mut report);
        }

        let meta_dir = layout::meta_dir(&backup_dir);
        if self.storage.exists(&meta_dir) {
            for name in self.storage.list_dir(&meta_dir)? {
                if layout::is_tmp_name(&name) {
                    self.remove_gc_file(&meta_dir.join(&name), &mut report);
                }
            }
        }

        let private_root = layout::private_root(&backup_dir);
        if self.storage.exists(&private_root) {
            for name in self.storage.list_dir(&private_root)? {
                let keep = name.parse::<BackupId>().is_ok_and(|id| {
                    self.backups.contains_key(&id)
                        || self.corrupt.contains_key(&id)
                        || self.hidden.contains_key(&id)
                });
                if keep {
                    continue;
                }
                match self.storage.remove_dir_all(&private_root.join(&name)) {
                    Ok(()) => report.deleted_dirs += 1,
                    Err(err) => {
                        warn!(
                            %name,
                            error = %err,
                            "garbage collection could not delete private directory"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        info!(
            deleted_files = report.deleted_files,
            deleted_dirs = report.deleted_dirs,
            failures = report.failures,
            "garbage collection finished"
        );
        Ok(report)
    }

    fn remove_gc_file(&self, path: &Path, report: &mut GcReport) -> bool {
        match self.storage.remove_file(path) {
            Ok(()) => {
                report.deleted_files += 1;
                true
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "garbage collection could not delete file"
                );
                report.failures += 1;
                false
            }
        }
    }

    /// Committed, non-corrupt backups ascending by ID.
    pub fn get_backup_info(&self) -> Vec<BackupInfo> {
        self.backups
            .values()
            .map(|meta| BackupInfo {
                backup_id: meta.id(),
                timestamp: meta.timestamp(),
                sequence_number: meta.sequence_number(),
                size: meta.total_size(),
                num_files: meta.num_files(),
                app_metadata: meta.app_metadata().map(<[u8]>::to_vec),
            })
            .collect()
    }

    /// IDs excluded at open because their manifest failed to parse or
    /// load-verify. They remain on disk until explicitly deleted.
    pub fn corrupt_backup_ids(&self) -> Vec<BackupId> {
        self.corrupt.keys().copied().collect()
    }

    /// The highest backup ID this engine considers assigned.
    pub fn latest_backup_id(&self) -> BackupId {
        self.latest_backup_id
    }

    /// Destination root this engine owns.
    pub fn backup_dir(&self) -> &Path {
        &self.options.backup_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupEngineOptions;
    use crate::source::{LiveFiles, WalFile};
    use crate::storage::LocalStorage;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Minimal database fake: a directory of real files plus the
    /// bookkeeping the trait requires.
    struct FakeDb {
        db_dir: PathBuf,
        files: Vec<String>,
        manifest_file_size: u64,
        sequence: u64,
        deletions_disabled: bool,
    }

    impl FakeDb {
        fn new(db_dir: &Path) -> Self {
            std::fs::create_dir_all(db_dir).unwrap();
            Self {
                db_dir: db_dir.to_path_buf(),
                files: Vec::new(),
                manifest_file_size: 0,
                sequence: 0,
                deletions_disabled: false,
            }
        }

        fn put_file(&mut self, name: &str, contents: &[u8]) {
            std::fs::write(self.db_dir.join(name), contents).unwrap();
            if !self.files.iter().any(|f| f == name) {
                self.files.push(name.to_string());
            }
            if name.starts_with("MANIFEST-") {
                self.manifest_file_size = contents.len() as u64;
            }
            self.sequence += 1;
        }
    }

    impl SourceDatabase for FakeDb {
        fn db_dir(&self) -> &Path {
            &self.db_dir
        }

        fn wal_dir(&self) -> &Path {
            &self.db_dir
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn disable_file_deletions(&mut self) -> Result<()> {
            self.deletions_disabled = true;
            Ok(())
        }

        fn enable_file_deletions(&mut self) -> Result<()> {
            self.deletions_disabled = false;
            Ok(())
        }

        fn live_files(&mut self) -> Result<LiveFiles> {
            assert!(self.deletions_disabled, "enumeration outside the bracket");
            Ok(LiveFiles {
                files: self.files.clone(),
                manifest_file_size: self.manifest_file_size,
            })
        }

        fn wal_files(&mut self) -> Result<Vec<WalFile>> {
            Ok(Vec::new())
        }

        fn latest_sequence_number(&self) -> u64 {
            self.sequence
        }
    }

    fn standard_db(dir: &Path) -> FakeDb {
        let mut db = FakeDb::new(dir);
        db.put_file("CURRENT", b"MANIFEST-000001\n");
        db.put_file("MANIFEST-000001", b"manifest contents v1");
        db.put_file("000004.sst", &[4u8; 300]);
        db
    }

    #[test]
    fn test_open_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let engine = BackupEngine::open(
            LocalStorage::new(),
            BackupEngineOptions::new(temp_dir.path().join("backups")),
        )
        .unwrap();

        assert_eq!(engine.latest_backup_id(), 0);
        assert!(engine.get_backup_info().is_empty());
        assert!(engine.corrupt_backup_ids().is_empty());
    }

    #[test]
    fn test_create_lists_and_restores() {
        let temp_dir = TempDir::new().unwrap();
        let backup_dir = temp_dir.path().join("backups");
        let mut db = standard_db(&temp_dir.path().join("db"));

        let mut engine =
            BackupEngine::open(LocalStorage::new(), BackupEngineOptions::new(&backup_dir)).unwrap();
        let id = engine.create_new_backup(&mut db, false).unwrap();
        assert_eq!(id, 1);
        assert!(!db.deletions_disabled);

        let infos = engine.get_backup_info();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].backup_id, 1);
        assert_eq!(infos[0].num_files, 3);
        assert_eq!(infos[0].size, 16 + 20 + 300);
        assert_eq!(infos[0].sequence_number, db.sequence);

        let restore_dir = temp_dir.path().join("restored");
        engine
            .restore_db_from_backup(1, &restore_dir, &restore_dir, &RestoreOptions::new())
            .unwrap();
        assert_eq!(
            std::fs::read(restore_dir.join("000004.sst")).unwrap(),
            vec![4u8; 300]
        );
        assert_eq!(
            std::fs::read(restore_dir.join("CURRENT")).unwrap(),
            b"MANIFEST-000001\n"
        );
    }

    #[test]
    fn test_commit_layout_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let backup_dir = temp_dir.path().join("backups");
        let mut db = standard_db(&temp_dir.path().join("db"));

        let mut engine =
            BackupEngine::open(LocalStorage::new(), BackupEngineOptions::new(&backup_dir)).unwrap();
        engine.create_new_backup(&mut db, false).unwrap();

        assert!(backup_dir.join("shared/000004.sst").exists());
        assert!(backup_dir.join("private/1/CURRENT").exists());
        assert!(backup_dir.join("private/1/MANIFEST-000001").exists());
        assert!(backup_dir.join("meta/1").exists());
        assert_eq!(
            std::fs::read(backup_dir.join("LATEST_BACKUP")).unwrap(),
            b"1"
        );
        assert!(!backup_dir.join("private/1.tmp").exists());
    }

    #[test]
    fn test_ids_are_not_reused_after_delete() {
        let temp_dir = TempDir::new().unwrap();
        let mut db = standard_db(&temp_dir.path().join("db"));
        let mut engine = BackupEngine::open(
            LocalStorage::new(),
            BackupEngineOptions::new(temp_dir.path().join("backups")),
        )
        .unwrap();

        assert_eq!(engine.create_new_backup(&mut db, false).unwrap(), 1);
        assert_eq!(engine.create_new_backup(&mut db, false).unwrap(), 2);
        engine.delete_backup(2).unwrap();
        assert_eq!(engine.create_new_backup(&mut db, false).unwrap(), 3);
    }

    #[test]
    fn test_delete_unknown_backup() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = BackupEngine::open(
            LocalStorage::new(),
            BackupEngineOptions::new(temp_dir.path().join("backups")),
        )
        .unwrap();
        assert!(matches!(
            engine.delete_backup(42),
            Err(CofferError::BackupNotFound(42))
        ));
    }

    #[test]
    fn test_reopen_recovers_state() {
        let temp_dir = TempDir::new().unwrap();
        let backup_dir = temp_dir.path().join("backups");
        let mut db = standard_db(&temp_dir.path().join("db"));

        {
            let mut engine =
                BackupEngine::open(LocalStorage::new(), BackupEngineOptions::new(&backup_dir))
                    .unwrap();
            engine.create_new_backup(&mut db, false).unwrap();
            db.put_file("000005.sst", &[5u8; 100]);
            engine.create_new_backup(&mut db, false).unwrap();
        }

        let engine =
            BackupEngine::open(LocalStorage::new(), BackupEngineOptions::new(&backup_dir)).unwrap();
        assert_eq!(engine.latest_backup_id(), 2);
        let infos = engine.get_backup_info();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].num_files, 4);
    }

    #[test]
    fn test_restore_latest_with_no_backups() {
        let temp_dir = TempDir::new().unwrap();
        let engine = BackupEngine::open(
            LocalStorage::new(),
            BackupEngineOptions::new(temp_dir.path().join("backups")),
        )
        .unwrap();
        let dst = temp_dir.path().join("restored");
        assert!(matches!(
            engine.restore_db_from_latest_backup(&dst, &dst, &RestoreOptions::new()),
            Err(CofferError::BackupNotFound(0))
        ));
    }

    #[test]
    fn test_gc_ignores_referenced_shared_files() {
        let temp_dir = TempDir::new().unwrap();
        let backup_dir = temp_dir.path().join("backups");
        let mut db = standard_db(&temp_dir.path().join("db"));

        let mut engine =
            BackupEngine::open(LocalStorage::new(), BackupEngineOptions::new(&backup_dir)).unwrap();
        engine.create_new_backup(&mut db, false).unwrap();

        let report = engine.garbage_collect().unwrap();
        assert_eq!(report, GcReport::default());
        assert!(backup_dir.join("shared/000004.sst").exists());
    }
}
