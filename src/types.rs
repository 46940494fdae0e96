//! Core data types used throughout the treesync library
//!
//! This module contains fundamental data structures that are shared across
//! different components of the library.
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **File System State**: `FileEntry`, `EntryType`, `Fingerprint` - one filesystem object and its metadata
//! - **Comparison**: `ComparePolicy`, `ChangeKind`, `ChangeStats` - how entries are compared and what changed
//! - **Configuration**: `SyncConfig` - the parameters of a synchronization run
//! - **Results**: `ApplyReport`, `ApplyFailure`, `ShutdownReport` - outcomes of the apply and teardown phases
//!
//! ## Examples
//!
//! ```rust
//! use treesync::types::{ComparePolicy, SyncConfig};
//! use std::path::PathBuf;
//!
//! let config = SyncConfig {
//!     source_path: PathBuf::from("./photos"),
//!     destination_path: PathBuf::from("/mnt/backup/photos"),
//!     use_content_hash: false,
//!     ..Default::default()
//! };
//! assert!(!config.compare_policy().use_content_hash);
//! ```

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of filesystem object tracked in a tree
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Regular file with content
    RegularFile,
    /// Directory
    Directory,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryType::RegularFile => write!(f, "file"),
            EntryType::Directory => write!(f, "dir"),
        }
    }
}

/// 128-bit content digest of a regular file
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    /// Hex representation of the digest
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// One filesystem object in a tree
///
/// Created when its metadata is first read and never modified afterwards.
/// The `relative_path` is the ordering and comparison key; `absolute_path`
/// is only used to perform I/O.
///
/// # Examples
///
/// ```rust
/// # use treesync::types::{EntryType, FileEntry};
/// # use std::path::PathBuf;
/// # use chrono::Utc;
/// let entry = FileEntry {
///     relative_path: PathBuf::from("docs/readme.md"),
///     absolute_path: PathBuf::from("/home/user/project/docs/readme.md"),
///     entry_type: EntryType::RegularFile,
///     size: 1024,
///     modified: Utc::now(),
///     mode: 0o100644,
///     fingerprint: None,
/// };
/// assert!(entry.is_file());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the tree's root
    pub relative_path: PathBuf,
    /// Full filesystem path
    pub absolute_path: PathBuf,
    /// File or directory
    pub entry_type: EntryType,
    /// Size in bytes (meaningful for regular files only)
    pub size: u64,
    /// Last modification time, nanosecond resolution
    pub modified: DateTime<Utc>,
    /// Permission and type bits as read from the filesystem
    pub mode: u32,
    /// Content digest, present only when hashing is enabled for regular files
    pub fingerprint: Option<Fingerprint>,
}

impl FileEntry {
    /// Whether this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// Whether this entry is a regular file
    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::RegularFile
    }

    /// Whole seconds of the modification time since the Unix epoch
    pub fn mtime_secs(&self) -> i64 {
        self.modified.timestamp()
    }

    /// Sub-second part of the modification time in nanoseconds
    pub fn mtime_nanos(&self) -> u32 {
        self.modified.timestamp_subsec_nanos()
    }

    /// Permission bits only (type bits stripped)
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<4} {:>04o} {:>12} {} {}",
            self.entry_type,
            self.permissions(),
            self.size,
            self.modified.format("%Y-%m-%d %H:%M:%S%.9f"),
            self.relative_path.display()
        )?;
        if let Some(fingerprint) = &self.fingerprint {
            write!(f, " {}", fingerprint)?;
        }
        Ok(())
    }
}

/// Policy controlling how two same-named entries are compared
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComparePolicy {
    /// Also compare content fingerprints of regular files
    pub use_content_hash: bool,
}

impl ComparePolicy {
    /// Metadata-only comparison (size and modification time)
    pub fn metadata_only() -> Self {
        Self { use_content_hash: false }
    }

    /// Metadata plus content fingerprint comparison
    pub fn with_content_hash() -> Self {
        Self { use_content_hash: true }
    }
}

/// Configuration for one synchronization run
///
/// Constructed once and passed by reference to every component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root of the tree to copy from
    pub source_path: PathBuf,
    /// Root of the tree to copy into
    pub destination_path: PathBuf,
    /// Total number of workers in parallel mode (listers included)
    pub worker_count: usize,
    /// Compare content fingerprints in addition to size and mtime
    pub use_content_hash: bool,
    /// Build trees with lister and analyzer workers
    pub parallel: bool,
    /// Compute and report differences without writing anything
    pub dry_run: bool,
    /// Print tree and diff listings
    pub verbose: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::new(),
            destination_path: PathBuf::new(),
            worker_count: num_cpus::get(),
            use_content_hash: true,
            parallel: true,
            dry_run: false,
            verbose: false,
        }
    }
}

impl SyncConfig {
    /// Comparison policy derived from this configuration
    pub fn compare_policy(&self) -> ComparePolicy {
        ComparePolicy {
            use_content_hash: self.use_content_hash,
        }
    }

    /// Number of analyzers spawned per side in parallel mode
    ///
    /// Two workers are reserved for the listers; the rest is split evenly
    /// between source and destination, with at least one analyzer per side.
    pub fn analyzers_per_side(&self) -> usize {
        (self.worker_count.saturating_sub(2) / 2).max(1)
    }

    /// Check the configuration before any tree is built
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidConfiguration`] for a zero worker count, a
    ///   source that is not a directory, a destination that exists but is
    ///   not a directory, or a destination equal to or inside the source
    /// - [`SyncError::PathNotFound`] if the source does not exist
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(SyncError::InvalidConfiguration(
                "worker count must be at least 1".to_string(),
            ));
        }

        let source = crate::utils::stat_root(&self.source_path)?;
        if source.entry_type != Some(EntryType::Directory) {
            return Err(SyncError::InvalidConfiguration(format!(
                "source {:?} is not a directory",
                self.source_path
            )));
        }

        match crate::utils::stat_root(&self.destination_path) {
            Ok(meta) if meta.entry_type != Some(EntryType::Directory) => {
                return Err(SyncError::InvalidConfiguration(format!(
                    "destination {:?} exists and is not a directory",
                    self.destination_path
                )));
            }
            Ok(_) | Err(SyncError::PathNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        if crate::utils::is_within(&self.destination_path, &self.source_path) {
            return Err(SyncError::InvalidConfiguration(format!(
                "destination {:?} is the source or lies inside it",
                self.destination_path
            )));
        }

        Ok(())
    }
}

/// How a diff entry differs from the destination
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeKind {
    /// Not present in the destination
    Added,
    /// Present in the destination but mismatching
    Changed,
}

/// Statistics about a diff list
///
/// # Examples
///
/// ```rust
/// # use treesync::types::ChangeStats;
/// let stats = ChangeStats {
///     added: 3,
///     changed: 2,
///     directories: 1,
///     bytes_to_copy: 4096,
/// };
/// assert_eq!(stats.total(), 5);
/// assert!(stats.has_changes());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeStats {
    /// Entries missing from the destination
    pub added: usize,
    /// Entries present in the destination but different
    pub changed: usize,
    /// Directory entries among the above
    pub directories: usize,
    /// Total size of the regular files to copy
    pub bytes_to_copy: u64,
}

impl ChangeStats {
    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.changed > 0
    }

    /// Get total number of entries to apply
    pub fn total(&self) -> usize {
        self.added + self.changed
    }
}

/// Operation that failed while applying a diff entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApplyOperation {
    /// Creating a directory (or a missing parent)
    CreateDirectory,
    /// Copying file content
    CopyFile,
    /// Restoring permission bits
    SetPermissions,
    /// Restoring the modification time
    SetModified,
    /// Removing an object of the wrong type in the way
    RemoveConflicting,
}

impl fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyOperation::CreateDirectory => "create directory",
            ApplyOperation::CopyFile => "copy file",
            ApplyOperation::SetPermissions => "set permissions",
            ApplyOperation::SetModified => "set modification time",
            ApplyOperation::RemoveConflicting => "remove conflicting entry",
        };
        f.write_str(name)
    }
}

/// A single failed diff entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyFailure {
    /// Relative path of the entry
    pub path: PathBuf,
    /// Operation that failed
    pub operation: ApplyOperation,
    /// Error description
    pub message: String,
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.path.display(), self.message)
    }
}

/// Result of applying a diff list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Directories created in the destination
    pub directories_created: usize,
    /// Regular files copied
    pub files_copied: usize,
    /// Total bytes written
    pub bytes_copied: u64,
    /// Entries processed (including failed ones)
    pub entries_processed: usize,
    /// Whether this was a dry run (no writes performed)
    pub dry_run: bool,
    /// Failures accumulated during the apply
    pub failures: Vec<ApplyFailure>,
    /// Non-fatal anomalies (e.g. a source file changed size while copying)
    pub warnings: Vec<String>,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl ApplyReport {
    /// Whether every entry was applied
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of distinct entries with at least one failure
    pub fn failed_entries(&self) -> usize {
        let mut paths: Vec<&PathBuf> = self.failures.iter().map(|f| &f.path).collect();
        paths.sort();
        paths.dedup();
        paths.len()
    }

    /// Convert accumulated failures into an error
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(SyncError::PartialApplyFailure {
                failed: self.failed_entries(),
                total: self.entries_processed,
            })
        }
    }
}

/// Outcome of tearing down the worker pool
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that were spawned
    pub workers: usize,
    /// Workers that acknowledged termination
    pub acknowledged: usize,
}
