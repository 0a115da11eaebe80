/*!
Backup manifest management: the per-backup meta file.

A committed backup is described by one text manifest under `meta/<id>`:

```text
<timestamp>
<sequence_number>
metadata <hex>          (optional)
<num_files>
<tag> <path> <size> crc32 <u32>    (num_files lines; `crc32 ...` optional)
```

`tag` is `shared` or `private`, `path` is relative to the backup
directory, and the pieces are separated by single spaces. Anything that
fails this grammar, including a checksum token that does not parse as a
decimal `u32`, is structural corruption and surfaces when the manifest
is loaded. A checksum that parses but disagrees with the file's bytes is
content corruption and surfaces only when those bytes are read back
during a restore.
*/

use std::io::Write;
use std::path::Path;

use crate::layout;
use crate::storage::StorageAdapter;
use crate::{BackupId, CofferError, Result};

/// One file captured by a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the backup directory
    pub relative_path: String,
    /// Size recorded at capture time
    pub size: u64,
    /// CRC32 of the captured bytes; entries without one restore
    /// unverified
    pub checksum: Option<u32>,
    /// Whether the file lives in the shared pool or under
    /// `private/<id>/`
    pub is_shared: bool,
}

/// The manifest of one backup.
///
/// Mutable only while the owning engine stages a new backup; once
/// committed it is only ever shared immutably.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupMeta {
    id: BackupId,
    timestamp: i64,
    sequence_number: u64,
    app_metadata: Option<Vec<u8>>,
    entries: Vec<FileEntry>,
}

impl BackupMeta {
    /// Create an empty manifest for a backup being staged
    pub(crate) fn new(id: BackupId, timestamp: i64, sequence_number: u64) -> Self {
        Self {
            id,
            timestamp,
            sequence_number,
            app_metadata: None,
            entries: Vec::new(),
        }
    }

    pub(crate) fn set_app_metadata(&mut self, app_metadata: Option<Vec<u8>>) {
        self.app_metadata = app_metadata;
    }

    pub(crate) fn add_file(&mut self, entry: FileEntry) {
        self.entries.push(entry);
    }

    pub fn id(&self) -> BackupId {
        self.id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn app_metadata(&self) -> Option<&[u8]> {
        self.app_metadata.as_deref()
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn num_files(&self) -> usize {
        self.entries.len()
    }

    /// Logical byte footprint: the sum of all entry sizes
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Render the manifest in the on-disk text format
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{}\n", self.timestamp));
        out.push_str(&format!("{}\n", self.sequence_number));
        if let Some(app_metadata) = &self.app_metadata {
            out.push_str(&format!("metadata {}\n", hex::encode(app_metadata)));
        }
        out.push_str(&format!("{}\n", self.entries.len()));
        for entry in &self.entries {
            let tag = if entry.is_shared { "shared" } else { "private" };
            match entry.checksum {
                Some(checksum) => out.push_str(&format!(
                    "{tag} {} {} crc32 {checksum}\n",
                    entry.relative_path, entry.size
                )),
                None => {
                    out.push_str(&format!("{tag} {} {}\n", entry.relative_path, entry.size))
                }
            }
        }
        out
    }

    /// Parse a manifest from its on-disk text; every deviation from the
    /// grammar is reported as structural corruption
    pub fn parse(id: BackupId, data: &str) -> Result<Self> {
        let mut lines = data.lines();

        let timestamp = lines
            .next()
            .ok_or_else(|| corrupt(id, "missing timestamp line"))?
            .trim()
            .parse::<i64>()
            .map_err(|_| corrupt(id, "timestamp is not a decimal integer"))?;
        let sequence_number = lines
            .next()
            .ok_or_else(|| corrupt(id, "missing sequence number line"))?
            .trim()
            .parse::<u64>()
            .map_err(|_| corrupt(id, "sequence number is not a decimal integer"))?;

        let mut line = lines
            .next()
            .ok_or_else(|| corrupt(id, "missing file count line"))?;
        let app_metadata = match line.strip_prefix("metadata ") {
            Some(encoded) => {
                let decoded = hex::decode(encoded.trim())
                    .map_err(|_| corrupt(id, "app metadata is not valid hex"))?;
                line = lines
                    .next()
                    .ok_or_else(|| corrupt(id, "missing file count line"))?;
                Some(decoded)
            }
            None => None,
        };

        let num_files = line
            .trim()
            .parse::<usize>()
            .map_err(|_| corrupt(id, "file count is not a decimal integer"))?;

        let mut entries = Vec::with_capacity(num_files.min(4096));
        for _ in 0..num_files {
            let line = lines
                .next()
                .ok_or_else(|| corrupt(id, "file list shorter than the declared count"))?;
            entries.push(Self::parse_entry(id, line)?);
        }
        if lines.next().is_some_and(|rest| !rest.trim().is_empty()) {
            return Err(corrupt(id, "trailing data after the declared file count"));
        }

        Ok(Self {
            id,
            timestamp,
            sequence_number,
            app_metadata,
            entries,
        })
    }

    fn parse_entry(id: BackupId, line: &str) -> Result<FileEntry> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 3 && tokens.len() != 5 {
            return Err(corrupt(id, format!("malformed file entry: {line:?}")));
        }

        let is_shared = match tokens[0] {
            "shared" => true,
            "private" => false,
            other => return Err(corrupt(id, format!("unknown entry tag {other:?}"))),
        };
        let relative_path = tokens[1].to_string();
        let size = tokens[2]
            .parse::<u64>()
            .map_err(|_| corrupt(id, format!("entry size is not decimal: {line:?}")))?;

        let checksum = if tokens.len() == 5 {
            if tokens[3] != "crc32" {
                return Err(corrupt(id, format!("unknown entry field {:?}", tokens[3])));
            }
            let value = tokens[4]
                .parse::<u32>()
                .map_err(|_| corrupt(id, format!("invalid checksum token {:?}", tokens[4])))?;
            Some(value)
        } else {
            None
        };

        let placement_ok = if is_shared {
            has_dir_prefix(&relative_path, layout::SHARED_DIR)
                || has_dir_prefix(&relative_path, layout::SHARED_CHECKSUM_DIR)
        } else {
            has_dir_prefix(&relative_path, layout::PRIVATE_DIR)
        };
        if !placement_ok {
            return Err(corrupt(
                id,
                format!("entry path {relative_path:?} does not match its tag"),
            ));
        }

        Ok(FileEntry {
            relative_path,
            size,
            checksum,
            is_shared,
        })
    }

    /// Load and verify the committed manifest for `id`.
    ///
    /// Verification checks that every referenced file exists with the
    /// recorded size. A backup missing one of its files is as unusable
    /// as one with an unparsable manifest, and the original detects
    /// both the same way, at load time. Checksums are deliberately not
    /// recomputed here; restore does that while it reads the bytes.
    pub(crate) fn load_from_file<S: StorageAdapter + ?Sized>(
        storage: &S,
        backup_dir: &Path,
        id: BackupId,
    ) -> Result<Self> {
        let meta_path = layout::meta_path(backup_dir, id);
        let raw = storage.read(&meta_path)?;
        let text = String::from_utf8(raw)
            .map_err(|_| corrupt(id, "manifest is not valid UTF-8"))?;
        let meta = Self::parse(id, &text)?;

        for entry in &meta.entries {
            let path = backup_dir.join(&entry.relative_path);
            let on_disk = storage.file_size(&path).map_err(|e| {
                corrupt(
                    id,
                    format!("referenced file {} is unreadable: {e}", entry.relative_path),
                )
            })?;
            if on_disk != entry.size {
                return Err(corrupt(
                    id,
                    format!(
                        "referenced file {} is {on_disk} bytes, manifest says {}",
                        entry.relative_path, entry.size
                    ),
                ));
            }
        }

        Ok(meta)
    }

    /// Store the manifest: serialize to `meta/<id>.tmp`, optionally
    /// fsync, then atomically rename to `meta/<id>`.
    pub(crate) fn store_to_file<S: StorageAdapter + ?Sized>(
        &self,
        storage: &S,
        backup_dir: &Path,
        sync: bool,
    ) -> Result<()> {
        let final_path = layout::meta_path(backup_dir, self.id);
        let tmp_path = layout::tmp_sibling(&final_path);

        let mut file = storage.open_write(&tmp_path)?;
        file.write_all(self.serialize().as_bytes())?;
        if sync {
            file.sync()?;
        } else {
            file.flush()?;
        }
        drop(file);

        storage.rename(&tmp_path, &final_path)
    }
}

fn has_dir_prefix(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn corrupt(id: BackupId, reason: impl std::fmt::Display) -> CofferError {
    CofferError::corruption(format!("backup {id} manifest: {reason}"))
}
