/*!
Checksummed, rate-limited file copying.

Every byte the engine moves, in either direction, flows through
[`copy_checksummed`] so it is checksummed and throttled uniformly. The
destination is always a caller-chosen temporary path; the caller owns
the atomic rename into the final name.
*/

use std::io::{Read, Write};
use std::path::Path;

use coffer_throttle::RateLimiter;

use crate::storage::StorageAdapter;
use crate::Result;

/// Chunk size for copy and checksum streams.
const COPY_BUFFER_SIZE: usize = 1 << 20;

/// Bytes moved and the CRC32 of exactly those bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    pub bytes: u64,
    pub checksum: u32,
}

/// Copy `src` to `dst`, feeding each chunk through `limiter` and a
/// rolling CRC32.
///
/// `size_limit` caps the bytes read from the source; the engine uses it
/// to snapshot a manifest that may still be growing. With `sync` the
/// destination is fsynced before success is reported.
///
/// On failure the partially written destination is left in place for
/// garbage collection; deleting it here could mask the original error
/// with a secondary one.
pub fn copy_checksummed<S: StorageAdapter + ?Sized>(
    storage: &S,
    src: &Path,
    dst: &Path,
    limiter: Option<&RateLimiter>,
    size_limit: Option<u64>,
    sync: bool,
) -> Result<CopyOutcome> {
    let mut reader = storage.open_read(src)?;
    let mut writer = storage.open_write(dst)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let mut remaining = size_limit.unwrap_or(u64::MAX);
    let mut total: u64 = 0;
    while remaining > 0 {
        let want = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        if let Some(limiter) = limiter {
            limiter.request(n as u64);
        }
        total += n as u64;
        remaining -= n as u64;
    }

    if sync {
        writer.sync()?;
    } else {
        writer.flush()?;
    }

    Ok(CopyOutcome {
        bytes: total,
        checksum: hasher.finalize(),
    })
}

/// Compute the CRC32 and length of a file without writing anything.
///
/// Used to classify a would-be shared copy (skip, copy, or collision)
/// and to build content-addressed shared names. Not throttled: the
/// rate limits govern copied bytes, not verification reads.
pub fn compute_checksum<S: StorageAdapter + ?Sized>(
    storage: &S,
    src: &Path,
    size_limit: Option<u64>,
) -> Result<CopyOutcome> {
    let mut reader = storage.open_read(src)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let mut remaining = size_limit.unwrap_or(u64::MAX);
    let mut total: u64 = 0;
    while remaining > 0 {
        let want = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
        remaining -= n as u64;
    }

    Ok(CopyOutcome {
        bytes: total,
        checksum: hasher.finalize(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    #[test]
    fn test_copy_reports_length_and_crc32() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let src = temp_dir.path().join("000004.sst");
        let dst = temp_dir.path().join("shared/000004.sst.tmp");

        let payload = b"immutable table file contents".repeat(100);
        storage.write(&src, &payload).unwrap();

        let outcome = copy_checksummed(&storage, &src, &dst, None, None, true).unwrap();
        assert_eq!(outcome.bytes, payload.len() as u64);
        assert_eq!(outcome.checksum, crc32fast::hash(&payload));
        assert_eq!(storage.read(&dst).unwrap(), payload);
    }

    #[test]
    fn test_size_limit_truncates_source() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let src = temp_dir.path().join("MANIFEST-000001");
        let dst = temp_dir.path().join("MANIFEST-000001.tmp");

        storage.write(&src, &[7u8; 500]).unwrap();

        let outcome = copy_checksummed(&storage, &src, &dst, None, Some(100), false).unwrap();
        assert_eq!(outcome.bytes, 100);
        assert_eq!(outcome.checksum, crc32fast::hash(&[7u8; 100]));
        assert_eq!(storage.file_size(&dst).unwrap(), 100);
    }

    #[test]
    fn test_empty_source() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let src = temp_dir.path().join("empty");
        let dst = temp_dir.path().join("empty.tmp");

        storage.write(&src, b"").unwrap();

        let outcome = copy_checksummed(&storage, &src, &dst, None, None, false).unwrap();
        assert_eq!(outcome.bytes, 0);
        assert_eq!(outcome.checksum, crc32fast::hash(b""));
        assert!(storage.exists(&dst));
    }

    #[test]
    fn test_checksum_only_matches_copy() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let src = temp_dir.path().join("000009.sst");

        storage.write(&src, &[42u8; 4096]).unwrap();

        let scanned = compute_checksum(&storage, &src, None).unwrap();
        let copied = copy_checksummed(
            &storage,
            &src,
            &temp_dir.path().join("out.tmp"),
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(scanned, copied);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new();
        let result = copy_checksummed(
            &storage,
            &temp_dir.path().join("missing.sst"),
            &temp_dir.path().join("out.tmp"),
            None,
            None,
            false,
        );
        assert!(result.is_err());
    }
}
