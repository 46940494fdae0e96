//! Error types for the treesync library
//!
//! This module defines all error types that can occur while building trees,
//! coordinating workers and applying differences. Errors carry the path and
//! operation that failed so they can be reported without extra context.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Type alias for Results in the treesync library
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for all treesync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A path that was required to exist is missing
    #[error("Path not found: {path:?}")]
    PathNotFound {
        /// Path that could not be found
        path: PathBuf,
    },

    /// Permission denied for file operation
    #[error("Permission denied: {path:?}")]
    PermissionDenied {
        /// Path where permission was denied
        path: PathBuf,
    },

    /// The system ran out of a resource (memory, descriptors, channel capacity)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A worker message was malformed, misaddressed or unauthorized
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// One or more diff entries could not be applied
    #[error("Failed to apply {failed} of {total} entries")]
    PartialApplyFailure {
        /// Number of entries that failed
        failed: usize,
        /// Number of entries that were attempted
        total: usize,
    },

    /// A single entry could not be stat-ed or fingerprinted during a tree build
    #[error("Tree build failed at {path:?}: {reason}")]
    BuildFailed {
        /// Path of the entry that failed
        path: PathBuf,
        /// Description of the failure
        reason: String,
    },

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A worker thread panicked before acknowledging termination
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Map an I/O error on `path` to the most specific error kind
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SyncError::PathNotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => SyncError::PermissionDenied {
                path: path.to_path_buf(),
            },
            io::ErrorKind::OutOfMemory => {
                SyncError::ResourceExhausted(format!("{}: {}", path.display(), err))
            }
            _ => SyncError::Io(io::Error::new(
                err.kind(),
                format!("{}: {}", path.display(), err),
            )),
        }
    }

    /// Create a protocol violation error with a custom message
    pub fn protocol(msg: impl Into<String>) -> Self {
        SyncError::ProtocolViolation(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SyncError::Internal(msg.into())
    }

    /// Create a build failure for `path`
    pub fn build_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SyncError::BuildFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error came from the worker message protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, SyncError::ProtocolViolation(_))
    }

    /// Check if this error means the run produced no usable result
    ///
    /// Partial apply failures are reported but the rest of the destination
    /// was still synchronized.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::PartialApplyFailure { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SyncError::PathNotFound { path } => {
                format!("{:?} does not exist. Check the source and destination arguments.", path)
            }
            SyncError::PermissionDenied { path } => {
                format!("Permission denied for {:?}. Check file permissions or run with appropriate privileges.", path)
            }
            SyncError::PartialApplyFailure { failed, total } => {
                format!(
                    "{} of {} entries could not be synchronized. Re-run with --verbose for details.",
                    failed, total
                )
            }
            SyncError::ProtocolViolation(msg) => {
                format!("Worker protocol violation ({}). Retry with --no-parallel.", msg)
            }
            _ => self.to_string(),
        }
    }
}
