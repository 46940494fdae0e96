//! Directory scanning for treesync
//!
//! This module walks a root directory and turns what it finds into a
//! [`FileTree`]. The walk itself ([`enumerate`]) is shared with the parallel
//! lister workers, which only need the paths; [`TreeBuilder`] is the serial
//! path that also reads metadata and fingerprints inline.
//!
//! ## Walk order
//!
//! Entries are visited depth-first with siblings sorted by name, and every
//! directory is visited before its contents. Symbolic links are never
//! followed and, together with sockets, FIFOs and device nodes, are not part
//! of the tree.
//!
//! ## Failure policy
//!
//! A build produces either a complete tree or an error. The only tolerated
//! failure is an entry that disappears between being listed and being read;
//! it is logged and left out, exactly as if the walk had started a moment
//! later.
//!
//! ## Example
//!
//! ```rust,no_run
//! use treesync::scanner::TreeBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = TreeBuilder::new("./project")
//!     .with_content_hash(true)
//!     .build()?;
//! println!("{} files, {} directories", tree.file_count(), tree.dir_count());
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, SyncError};
use crate::tree::FileTree;
use crate::types::EntryType;
use crate::utils;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};
use walkdir::WalkDir;

/// A path found by the walk, before its metadata is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPath {
    /// Full filesystem path
    pub absolute_path: PathBuf,
    /// Path relative to the walk root
    pub relative_path: PathBuf,
    /// Type as reported by the directory listing
    pub entry_type: EntryType,
}

/// Walk `root` and hand every file and directory to `visit`
///
/// The root itself is not reported. Returns the number of paths visited.
/// Stops at the first error returned by the walk or by `visit`.
pub fn enumerate<F>(root: &Path, mut visit: F) -> Result<usize>
where
    F: FnMut(DiscoveredPath) -> Result<()>,
{
    let mut visited = 0usize;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .follow_root_links(true)
        .sort_by_file_name();

    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                if is_vanished(&e) {
                    warn!("Entry vanished during walk: {:?}", e.path());
                    continue;
                }
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                return Err(match e.into_io_error() {
                    Some(io_err) => SyncError::from_io(&path, io_err),
                    None => SyncError::build_failed(path, "filesystem loop detected"),
                });
            }
        };

        let file_type = entry.file_type();
        let entry_type = if file_type.is_dir() {
            EntryType::Directory
        } else if file_type.is_file() {
            EntryType::RegularFile
        } else {
            debug!("Skipping symlink or special file {:?}", entry.path());
            continue;
        };

        let relative_path = utils::make_relative(entry.path(), root)?;
        visit(DiscoveredPath {
            absolute_path: entry.into_path(),
            relative_path,
            entry_type,
        })?;
        visited += 1;
    }

    Ok(visited)
}

/// Whether a walk error means a non-root entry was deleted mid-walk
fn is_vanished(err: &walkdir::Error) -> bool {
    err.depth() > 0
        && err
            .io_error()
            .map(|e| e.kind() == io::ErrorKind::NotFound)
            .unwrap_or(false)
}

/// Serial tree builder
///
/// Walks the root and reads metadata (and, when enabled, a content
/// fingerprint) for every entry on the calling thread.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    root: PathBuf,
    use_content_hash: bool,
    allow_missing_root: bool,
}

impl TreeBuilder {
    /// Create a builder for `root` with hashing disabled
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            use_content_hash: false,
            allow_missing_root: false,
        }
    }

    /// Compute content fingerprints for regular files
    pub fn with_content_hash(mut self, enabled: bool) -> Self {
        self.use_content_hash = enabled;
        self
    }

    /// Treat a missing root as an empty tree instead of an error
    ///
    /// Used for the destination side, which the executor creates on demand.
    pub fn allow_missing_root(mut self, allow: bool) -> Self {
        self.allow_missing_root = allow;
        self
    }

    /// Walk the root and build its tree
    ///
    /// # Errors
    ///
    /// - [`SyncError::PathNotFound`] if the root does not exist (unless allowed)
    /// - [`SyncError::BuildFailed`] if the root is not a directory
    /// - Any error from reading or hashing an entry
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn build(&self) -> Result<FileTree> {
        let start = Instant::now();
        let mut tree = FileTree::new(self.root.clone());

        if !check_root(&self.root, self.allow_missing_root)? {
            info!("Root {:?} does not exist yet, starting from an empty tree", self.root);
            return Ok(tree);
        }

        enumerate(&self.root, |found| {
            match utils::analyze_entry(&found.absolute_path, &found.relative_path, self.use_content_hash) {
                Ok(Some(entry)) => {
                    trace!("Analyzed {:?}", entry.relative_path);
                    if !tree.insert(entry) {
                        warn!("Duplicate entry {:?} ignored", found.relative_path);
                    }
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(SyncError::PathNotFound { path }) => {
                    warn!("Entry vanished before it could be read: {:?}", path);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })?;

        debug!(
            "Built tree for {:?}: {} entries ({} bytes) in {:?}",
            self.root,
            tree.len(),
            tree.total_size(),
            start.elapsed()
        );

        Ok(tree)
    }
}

/// Validate a walk root
///
/// Returns `Ok(false)` when the root is missing and that is allowed.
pub(crate) fn check_root(root: &Path, allow_missing: bool) -> Result<bool> {
    match utils::stat_root(root) {
        Ok(meta) if meta.entry_type == Some(EntryType::Directory) => Ok(true),
        Ok(_) => Err(SyncError::build_failed(root, "not a directory")),
        Err(SyncError::PathNotFound { .. }) if allow_missing => Ok(false),
        Err(e) => Err(e),
    }
}
