//! Error types for ntfstrace
//!
//! One error enum for every decoder session. Corruption that can be pinned to a
//! single record never surfaces here; it is carried on the record itself.

use thiserror::Error;

use crate::ntfs::mft::PathResolutionError;

/// Main error type for ntfstrace operations
#[derive(Error, Debug)]
pub enum NtfsTraceError {
    /// Invalid magic or signature on a structure the whole session depends on
    #[error("Format error: {0}")]
    Format(String),

    /// Checksum or fixup mismatch
    #[error("Corrupted structure at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    /// Container codec not available (e.g. EWF/E01)
    #[error("Unsupported image format '{format}': {path}")]
    UnsupportedFormat { format: String, path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path resolution failed: {0}")]
    PathResolution(#[from] PathResolutionError),

    /// Artifact absent on the volume (e.g. change journal disabled)
    #[error("{0} not found on volume")]
    NotFound(String),

    #[error("No input artifact supplied")]
    NoInput,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for ntfstrace operations
pub type Result<T> = std::result::Result<T, NtfsTraceError>;

impl NtfsTraceError {
    pub fn format(msg: impl Into<String>) -> Self {
        NtfsTraceError::Format(msg.into())
    }

    pub fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        NtfsTraceError::Corruption {
            offset,
            reason: reason.into(),
        }
    }

    /// Check if this error is local to one record or artifact (processing can continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NtfsTraceError::Corruption { .. }
                | NtfsTraceError::PathResolution(_)
                | NtfsTraceError::NotFound(_)
                | NtfsTraceError::UnsupportedFormat { .. }
        )
    }
}
