//! On-disk layout of a backup directory.
//!
//! ```text
//! <backup_dir>/
//!   shared/ or shared_checksum/   deduplicated immutable files
//!   private/<id>/                 per-backup files
//!   meta/<id>                     committed manifest
//!   LATEST_BACKUP                 ASCII decimal BackupId
//! ```
//!
//! Anything in flight uses a `.tmp` suffix of its final path and becomes
//! visible only through an atomic rename.

use std::path::{Path, PathBuf};

use crate::BackupId;

pub(crate) const SHARED_DIR: &str = "shared";
pub(crate) const SHARED_CHECKSUM_DIR: &str = "shared_checksum";
pub(crate) const PRIVATE_DIR: &str = "private";
pub(crate) const META_DIR: &str = "meta";
pub(crate) const LATEST_BACKUP_FILE: &str = "LATEST_BACKUP";
pub(crate) const TMP_SUFFIX: &str = ".tmp";

pub(crate) fn meta_dir(backup_dir: &Path) -> PathBuf {
    backup_dir.join(META_DIR)
}

pub(crate) fn meta_path(backup_dir: &Path, id: BackupId) -> PathBuf {
    backup_dir.join(META_DIR).join(id.to_string())
}

pub(crate) fn private_root(backup_dir: &Path) -> PathBuf {
    backup_dir.join(PRIVATE_DIR)
}

pub(crate) fn private_dir(backup_dir: &Path, id: BackupId) -> PathBuf {
    backup_dir.join(PRIVATE_DIR).join(id.to_string())
}

pub(crate) fn private_tmp_dir(backup_dir: &Path, id: BackupId) -> PathBuf {
    backup_dir
        .join(PRIVATE_DIR)
        .join(format!("{id}{TMP_SUFFIX}"))
}

pub(crate) fn latest_backup_path(backup_dir: &Path) -> PathBuf {
    backup_dir.join(LATEST_BACKUP_FILE)
}

/// The same path with `.tmp` appended to its file name.
pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(TMP_SUFFIX);
    path.with_file_name(name)
}

pub(crate) fn is_tmp_name(name: &str) -> bool {
    name.ends_with(TMP_SUFFIX)
}

/// Backup-dir-relative destination for a name-keyed shared file.
pub(crate) fn shared_rel(file_name: &str) -> String {
    format!("{SHARED_DIR}/{file_name}")
}

/// Backup-dir-relative destination for a content-addressed shared file:
/// the checksum and size are spliced in before the extension, e.g.
/// `000010.sst` -> `shared_checksum/000010_3866553689_200.sst`.
pub(crate) fn shared_checksum_rel(file_name: &str, checksum: u32, size: u64) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{SHARED_CHECKSUM_DIR}/{stem}_{checksum}_{size}.{ext}"),
        None => format!("{SHARED_CHECKSUM_DIR}/{file_name}_{checksum}_{size}"),
    }
}

/// Destination file name a manifest entry restores under: the bare
/// file name, with the `_<checksum>_<size>` decoration stripped again
/// for content-addressed shared entries.
pub(crate) fn restore_file_name(relative_path: &str) -> String {
    let name = relative_path
        .rsplit('/')
        .next()
        .unwrap_or(relative_path);
    if !relative_path.starts_with(SHARED_CHECKSUM_DIR) {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}.{ext}", strip_decoration(stem)),
        None => strip_decoration(name).to_string(),
    }
}

fn strip_decoration(stem: &str) -> &str {
    let mut rest = stem;
    for _ in 0..2 {
        match rest.rsplit_once('_') {
            Some((head, tail))
                if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) =>
            {
                rest = head;
            }
            _ => return stem,
        }
    }
    rest
}
