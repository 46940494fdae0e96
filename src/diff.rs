//! Tree comparison
//!
//! This module decides which source entries must be replayed onto the
//! destination.
//!
//! ## Overview
//!
//! [`diff`] walks the source tree in order and looks each entry up in the
//! destination with a forward-only [`TreeCursor`]. Because both trees share
//! the same ordering, each lookup resumes where the previous one stopped and
//! the whole pass is linear in the size of both trees.
//!
//! - Missing from the destination: **added**
//! - Present but [`mismatch`] is true: **changed**
//! - Present and matching: left out
//!
//! Entries that exist only in the destination are never reported; the
//! synchronizer does not delete.
//!
//! ## Example
//!
//! ```rust,no_run
//! use treesync::diff::diff;
//! use treesync::scanner::TreeBuilder;
//! use treesync::types::ComparePolicy;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = TreeBuilder::new("./src").build()?;
//! let destination = TreeBuilder::new("./dst").allow_missing_root(true).build()?;
//!
//! let changes = diff(&source, &destination, ComparePolicy::metadata_only());
//! println!("{} entries to apply", changes.len());
//! # Ok(())
//! # }
//! ```

use crate::tree::{FileTree, TreeCursor};
use crate::types::{ChangeKind, ChangeStats, ComparePolicy, EntryType, FileEntry};
use crate::utils::names_eq_ignore_case;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Whether two same-named entries differ enough to need re-synchronizing
///
/// Names are compared ignoring ASCII case, unlike tree ordering which is
/// case-sensitive. A file never matches a directory. Files are compared by
/// size and modification time (seconds and nanoseconds) and, under a hashing
/// policy, by fingerprint; directories only by permission mode.
///
/// # Example
///
/// ```rust
/// # use treesync::diff::mismatch;
/// # use treesync::types::{ComparePolicy, EntryType, FileEntry};
/// # use std::path::PathBuf;
/// # use chrono::Utc;
/// let now = Utc::now();
/// let a = FileEntry {
///     relative_path: PathBuf::from("f.txt"),
///     absolute_path: PathBuf::from("/src/f.txt"),
///     entry_type: EntryType::RegularFile,
///     size: 10,
///     modified: now,
///     mode: 0o100644,
///     fingerprint: None,
/// };
/// let mut b = a.clone();
/// assert!(!mismatch(&a, &b, ComparePolicy::metadata_only()));
/// b.size = 11;
/// assert!(mismatch(&a, &b, ComparePolicy::metadata_only()));
/// ```
pub fn mismatch(a: &FileEntry, b: &FileEntry, policy: ComparePolicy) -> bool {
    if !names_eq_ignore_case(&a.relative_path, &b.relative_path) {
        return true;
    }
    if a.entry_type != b.entry_type {
        return true;
    }

    match a.entry_type {
        EntryType::RegularFile => {
            a.size != b.size
                || a.mtime_secs() != b.mtime_secs()
                || a.mtime_nanos() != b.mtime_nanos()
                || (policy.use_content_hash && a.fingerprint != b.fingerprint)
        }
        EntryType::Directory => a.mode != b.mode,
    }
}

/// A source entry that must be applied to the destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffItem {
    /// The source entry
    pub entry: FileEntry,
    /// Why it is listed
    pub change: ChangeKind,
}

/// Ordered list of entries to apply, in source tree order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffList {
    items: Vec<DiffItem>,
}

impl DiffList {
    /// Listed items in order
    pub fn items(&self) -> &[DiffItem] {
        &self.items
    }

    /// Source entries in order
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &FileEntry> + '_ {
        self.items.iter().map(|item| &item.entry)
    }

    /// Number of entries to apply
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing needs to be applied
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Summary counts
    pub fn stats(&self) -> ChangeStats {
        let mut stats = ChangeStats::default();
        for item in &self.items {
            match item.change {
                ChangeKind::Added => stats.added += 1,
                ChangeKind::Changed => stats.changed += 1,
            }
            if item.entry.is_dir() {
                stats.directories += 1;
            } else {
                stats.bytes_to_copy += item.entry.size;
            }
        }
        stats
    }
}

impl<'a> IntoIterator for &'a DiffList {
    type Item = &'a DiffItem;
    type IntoIter = std::slice::Iter<'a, DiffItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl fmt::Display for DiffList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} entries to apply", self.items.len())?;
        for item in &self.items {
            let marker = match item.change {
                ChangeKind::Added => '+',
                ChangeKind::Changed => '~',
            };
            writeln!(f, "  {} {}", marker, item.entry)?;
        }
        Ok(())
    }
}

/// Compute the entries of `source` that must be applied to `destination`
pub fn diff(source: &FileTree, destination: &FileTree, policy: ComparePolicy) -> DiffList {
    let mut cursor: TreeCursor<'_> = destination.cursor();
    let mut items = Vec::new();

    for entry in source {
        let change = match cursor.seek(&entry.relative_path) {
            None => ChangeKind::Added,
            Some(existing) if mismatch(entry, existing, policy) => ChangeKind::Changed,
            Some(_) => continue,
        };
        trace!("{:?} {:?}", change, entry.relative_path);
        items.push(DiffItem {
            entry: entry.clone(),
            change,
        });
    }

    debug!(
        "Diff of {} source against {} destination entries: {} to apply",
        source.len(),
        destination.len(),
        items.len()
    );
    DiffList { items }
}
