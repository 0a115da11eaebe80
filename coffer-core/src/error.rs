/*!
Error types for the Coffer backup engine.
*/

use thiserror::Error;

use crate::BackupId;

/// Result type used throughout the Coffer core.
pub type Result<T> = std::result::Result<T, CofferError>;

/// Errors that can occur during backup and restore operations.
#[derive(Error, Debug)]
pub enum CofferError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// The requested backup ID is neither committed nor known-corrupt
    #[error("Backup {0} not found")]
    BackupNotFound(BackupId),

    /// Structural corruption: a meta file, pointer, or file name that
    /// cannot be parsed, or a referenced file missing or mis-sized
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Content corruption: a stored checksum disagrees with the bytes
    /// actually read back
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: u32,
        actual: u32,
    },

    /// A shared-pool file name clashes with different content still
    /// referenced by another backup
    #[error("Shared file collision on {path}: {reason}")]
    Collision { path: String, reason: String },

    /// Validation errors in engine or restore options
    #[error("Validation error: {0}")]
    Validation(String),
}

impl CofferError {
    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new structural corruption error
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// True for every corruption-classified failure: structural, content,
    /// and shared-pool collisions.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corruption(_) | Self::ChecksumMismatch { .. } | Self::Collision { .. }
        )
    }

    /// True only for content corruption (a parsed checksum that fails
    /// recomputation), the one class the restore-latest path may step
    /// past to an older backup.
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}
