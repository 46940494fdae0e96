//! Filesystem capabilities for treesync
//!
//! This module wraps the low-level operations the engine consumes as opaque
//! capabilities: reading entry metadata, computing content fingerprints,
//! copying file content, and restoring attributes on the destination. It
//! also holds the path helpers that define tree ordering.
//!
//! ## Categories of Utilities
//!
//! ### Metadata and Fingerprints
//! - `stat_entry`: type, size, mode and modification time without following symlinks
//! - `stat_root`: the same for a walk root, following a link at the root itself
//! - `fingerprint`: 128-bit MD5 digest of a file's content
//! - `analyze_entry`: both of the above folded into a `FileEntry`
//!
//! ### Replication
//! - `copy_bytes`: copy content through a temporary file persisted over the target
//! - `set_permissions` / `set_modified`: restore attributes after a copy
//!
//! ### Paths
//! - `compare_paths`: the byte-wise ordering used by every `FileTree`
//! - `names_eq_ignore_case`: the case-insensitive name test used by `mismatch`
//! - `make_relative`, `is_within`, `format_bytes`
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::utils::{analyze_entry, format_bytes};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let root = Path::new("/home/user/project");
//! if let Some(entry) = analyze_entry(&root.join("main.rs"), Path::new("main.rs"), true)? {
//!     println!("{} ({})", entry.relative_path.display(), format_bytes(entry.size));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! All utility functions are thread-safe and can be called concurrently from
//! multiple workers without synchronization.

use crate::error::{Result, SyncError};
use crate::types::{EntryType, FileEntry, Fingerprint};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use md5::{Digest, Md5};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::trace;

/// Metadata read from the filesystem for one path
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    /// Entry type, `None` for symlinks and special files
    pub entry_type: Option<EntryType>,
    /// Size in bytes
    pub size: u64,
    /// Permission and type bits
    pub mode: u32,
    /// Last modification timestamp
    pub modified: DateTime<Utc>,
}

/// Read metadata for `path` without following symbolic links
///
/// # Errors
///
/// - [`SyncError::PathNotFound`] if the path does not exist
/// - [`SyncError::PermissionDenied`] if the path cannot be accessed
/// - [`SyncError::Io`] for any other failure
pub fn stat_entry(path: &Path) -> Result<EntryMetadata> {
    let metadata = fs::symlink_metadata(path).map_err(|e| SyncError::from_io(path, e))?;
    entry_metadata(path, &metadata)
}

/// Read metadata for a walk root, following a symbolic link at `path`
///
/// Roots are what the user names on the command line, so a link to a
/// directory counts as a directory here. Entries below the root still go
/// through [`stat_entry`].
///
/// # Errors
///
/// Same as [`stat_entry`]; a dangling link is [`SyncError::PathNotFound`].
pub fn stat_root(path: &Path) -> Result<EntryMetadata> {
    let metadata = fs::metadata(path).map_err(|e| SyncError::from_io(path, e))?;
    entry_metadata(path, &metadata)
}

fn entry_metadata(path: &Path, metadata: &fs::Metadata) -> Result<EntryMetadata> {
    let file_type = metadata.file_type();

    let entry_type = if file_type.is_dir() {
        Some(EntryType::Directory)
    } else if file_type.is_file() {
        Some(EntryType::RegularFile)
    } else {
        None
    };

    let modified = metadata.modified().map_err(|e| SyncError::from_io(path, e))?;

    Ok(EntryMetadata {
        entry_type,
        size: if file_type.is_file() { metadata.len() } else { 0 },
        mode: get_mode(metadata),
        modified: DateTime::<Utc>::from(modified),
    })
}

/// Compute the 128-bit content fingerprint of a file
///
/// Reads the file in 64KB chunks so memory use stays flat for large files.
pub fn fingerprint(path: &Path) -> Result<Fingerprint> {
    let mut file = File::open(path).map_err(|e| SyncError::from_io(path, e))?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SyncError::from_io(path, e)),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    Ok(Fingerprint(bytes))
}

/// Build a fully populated `FileEntry` for `absolute_path`
///
/// Returns `Ok(None)` for symlinks and special files, which are not
/// synchronized. The fingerprint is only computed for regular files and
/// only when `use_content_hash` is set.
pub fn analyze_entry(
    absolute_path: &Path,
    relative_path: &Path,
    use_content_hash: bool,
) -> Result<Option<FileEntry>> {
    let metadata = stat_entry(absolute_path)?;

    let Some(entry_type) = metadata.entry_type else {
        trace!("Skipping unsupported entry {:?}", absolute_path);
        return Ok(None);
    };

    let fingerprint = if use_content_hash && entry_type == EntryType::RegularFile {
        Some(fingerprint(absolute_path)?)
    } else {
        None
    };

    Ok(Some(FileEntry {
        relative_path: relative_path.to_path_buf(),
        absolute_path: absolute_path.to_path_buf(),
        entry_type,
        size: metadata.size,
        modified: metadata.modified,
        mode: metadata.mode,
        fingerprint,
    }))
}

/// Copy the content of `src` over `dst`
///
/// The content is written to a temporary file next to `dst` and renamed
/// into place, so `dst` is never observed half-written. Returns the number
/// of bytes copied.
pub fn copy_bytes(src: &Path, dst: &Path) -> Result<u64> {
    let parent = dst
        .parent()
        .ok_or_else(|| SyncError::internal(format!("{:?} has no parent directory", dst)))?;

    let mut source = File::open(src).map_err(|e| SyncError::from_io(src, e))?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| SyncError::from_io(parent, e))?;

    let copied = io::copy(&mut source, temp.as_file_mut()).map_err(|e| SyncError::from_io(src, e))?;
    temp.as_file().sync_data().map_err(|e| SyncError::from_io(dst, e))?;
    temp.persist(dst).map_err(|e| SyncError::from_io(dst, e.error))?;

    trace!("Copied {} bytes {:?} -> {:?}", copied, src, dst);
    Ok(copied)
}

/// Get the mode bits from metadata
#[cfg(unix)]
fn get_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

/// Get mode bits from metadata (Windows implementation)
#[cfg(windows)]
fn get_mode(metadata: &fs::Metadata) -> u32 {
    let mut mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    if metadata.is_dir() {
        mode |= 0o040111;
    } else {
        mode |= 0o100000;
    }
    mode
}

/// Set Unix permissions
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = fs::Permissions::from_mode(mode & 0o7777);
    fs::set_permissions(path, permissions).map_err(|e| SyncError::from_io(path, e))
}

/// Set permissions (Windows implementation)
#[cfg(windows)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| SyncError::from_io(path, e))?;
    let mut perms = metadata.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms).map_err(|e| SyncError::from_io(path, e))
}

/// Set the modification time of `path`, keeping nanosecond precision
pub fn set_modified(path: &Path, modified: &DateTime<Utc>) -> Result<()> {
    let mtime = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, mtime).map_err(|e| SyncError::from_io(path, e))
}

/// Raw bytes of a path used as the ordering key
#[cfg(unix)]
fn path_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    match path.to_string_lossy() {
        std::borrow::Cow::Borrowed(s) => std::borrow::Cow::Borrowed(s.as_bytes()),
        std::borrow::Cow::Owned(s) => std::borrow::Cow::Owned(s.into_bytes()),
    }
}

/// Byte-wise, case-sensitive ordering of relative paths
///
/// Unlike `Path::cmp`, which orders by components, this compares the raw
/// bytes, so `a-b` sorts before `a/b`. A directory still always sorts
/// before its descendants because it is a strict prefix of them.
pub fn compare_paths(a: &Path, b: &Path) -> Ordering {
    path_bytes(a).cmp(&path_bytes(b))
}

/// ASCII case-insensitive equality of two paths
pub fn names_eq_ignore_case(a: &Path, b: &Path) -> bool {
    path_bytes(a).eq_ignore_ascii_case(&path_bytes(b))
}

/// Make a path relative to a base path
///
/// Attempts a lexical strip first and falls back to canonicalizing both
/// paths when the lexical form differs (e.g. `..` components).
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize().map_err(|e| SyncError::from_io(path, e))?;
    let base_canon = base.canonicalize().map_err(|e| SyncError::from_io(base, e))?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| SyncError::internal(format!(
            "Path {:?} is not relative to {:?}",
            path_canon, base_canon
        )))
}

/// Whether `path` is `base` or lies beneath it, after resolving both
pub fn is_within(path: &Path, base: &Path) -> bool {
    resolve(path).starts_with(resolve(base))
}

/// Canonical form of a path that may not exist yet
///
/// The deepest existing ancestor is canonicalized and the missing tail is
/// appended unchanged.
fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    for ancestor in absolute.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            return match absolute.strip_prefix(ancestor) {
                Ok(tail) => canonical.join(tail),
                Err(_) => canonical,
            };
        }
    }
    absolute
}

/// Format bytes in human-readable form
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
