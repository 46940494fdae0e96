//! Ordered file tree
//!
//! A `FileTree` is the inventory of one side of a synchronization run: every
//! file and directory under a root, keyed by relative path and kept in
//! strictly increasing byte-wise order with no duplicates. The order does not
//! depend on the order entries were inserted in, which is what lets parallel
//! workers deliver analyzed entries in any order.
//!
//! ## Example
//!
//! ```rust
//! use treesync::tree::FileTree;
//! # use treesync::types::{EntryType, FileEntry};
//! # use chrono::Utc;
//! use std::path::{Path, PathBuf};
//!
//! # fn entry(path: &str) -> FileEntry {
//! #     FileEntry {
//! #         relative_path: PathBuf::from(path),
//! #         absolute_path: PathBuf::from("/root").join(path),
//! #         entry_type: EntryType::RegularFile,
//! #         size: 0,
//! #         modified: Utc::now(),
//! #         mode: 0o100644,
//! #         fingerprint: None,
//! #     }
//! # }
//! let mut tree = FileTree::new(PathBuf::from("/root"));
//! tree.insert(entry("b.txt"));
//! tree.insert(entry("a.txt"));
//! assert!(!tree.insert(entry("a.txt")));
//!
//! let names: Vec<_> = tree.iter().map(|e| e.relative_path.clone()).collect();
//! assert_eq!(names, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
//! assert!(tree.get(Path::new("b.txt")).is_some());
//! ```

use crate::types::FileEntry;
use crate::utils::compare_paths;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// Ordered collection of filesystem entries keyed by relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    root: PathBuf,
    entries: Vec<FileEntry>,
}

impl FileTree {
    /// Create an empty tree for `root`
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            entries: Vec::new(),
        }
    }

    /// Root directory this tree describes
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Insert an entry at its ordered position
    ///
    /// Returns `false` and leaves the tree unchanged if an entry with the same
    /// relative path is already present.
    pub fn insert(&mut self, entry: FileEntry) -> bool {
        // Walk output arrives mostly sorted; appending is the common case
        if let Some(last) = self.entries.last() {
            match compare_paths(&last.relative_path, &entry.relative_path) {
                Ordering::Less => {
                    self.entries.push(entry);
                    return true;
                }
                Ordering::Equal => return false,
                Ordering::Greater => {}
            }
        }

        match self.position(&entry.relative_path) {
            Ok(_) => false,
            Err(index) => {
                self.entries.insert(index, entry);
                true
            }
        }
    }

    /// Look up an entry by relative path
    pub fn get(&self, relative_path: &Path) -> Option<&FileEntry> {
        self.position(relative_path).ok().map(|i| &self.entries[i])
    }

    /// Whether an entry with this relative path exists
    pub fn contains(&self, relative_path: &Path) -> bool {
        self.position(relative_path).is_ok()
    }

    /// Iterate entries in order; reversible for backward iteration
    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }

    /// Cursor for monotonic bounded lookups
    pub fn cursor(&self) -> TreeCursor<'_> {
        TreeCursor {
            entries: &self.entries,
            index: 0,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of regular files
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_file()).count()
    }

    /// Number of directories
    pub fn dir_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_dir()).count()
    }

    /// Total size of all regular files
    pub fn total_size(&self) -> u64 {
        self.entries.iter().filter(|e| e.is_file()).map(|e| e.size).sum()
    }

    fn position(&self, relative_path: &Path) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|probe| compare_paths(&probe.relative_path, relative_path))
    }
}

impl<'a> IntoIterator for &'a FileTree {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for FileTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({} entries)", self.root.display(), self.entries.len())?;
        for entry in &self.entries {
            writeln!(f, "  {}", entry)?;
        }
        Ok(())
    }
}

/// Forward-only lookup position in a `FileTree`
///
/// Probes must be issued in non-decreasing order. Each `seek` resumes where
/// the previous one stopped and gives up as soon as the current key exceeds
/// the probe, so a full pass over two trees costs O(n + m).
#[derive(Debug, Clone)]
pub struct TreeCursor<'a> {
    entries: &'a [FileEntry],
    index: usize,
}

impl<'a> TreeCursor<'a> {
    /// Find the entry for `relative_path`, skipping every smaller key
    pub fn seek(&mut self, relative_path: &Path) -> Option<&'a FileEntry> {
        while let Some(entry) = self.entries.get(self.index) {
            match compare_paths(&entry.relative_path, relative_path) {
                Ordering::Less => self.index += 1,
                Ordering::Equal => {
                    self.index += 1;
                    return Some(entry);
                }
                Ordering::Greater => return None,
            }
        }
        None
    }

    /// Entries not yet passed by the cursor
    pub fn remaining(&self) -> &'a [FileEntry] {
        &self.entries[self.index.min(self.entries.len())..]
    }
}
