//! Applying a diff list to the destination
//!
//! The [`SyncExecutor`] replays each [`DiffList`] entry onto the destination
//! tree. Source always wins: an object of the wrong type in the way is
//! removed before the source entry is written.
//!
//! ## Ordering
//!
//! Missing parent directories are created on demand, so the executor does
//! not depend on a directory's own entry preceding its children. Directory
//! permissions and modification times are restored in a second pass once
//! every file has been written, deepest directories first. Writing a child
//! would otherwise bump the parent's mtime, and a read-only parent could not
//! receive its children at all.
//!
//! An existing destination directory that lacks owner write permission but
//! has no diff entry of its own gets owner write added before anything is
//! created inside it. Its original mode and mtime are put back in the same
//! deferred pass.
//!
//! ## Failures
//!
//! A failure on one entry never stops the others. Every failed operation is
//! recorded in [`ApplyReport::failures`] with its path and operation, and
//! [`ApplyReport::into_result`] turns a non-empty set into
//! [`SyncError::PartialApplyFailure`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use treesync::diff::diff;
//! use treesync::scanner::TreeBuilder;
//! use treesync::sync::SyncExecutor;
//! use treesync::types::ComparePolicy;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = TreeBuilder::new("./src").build()?;
//! let destination = TreeBuilder::new("./dst").allow_missing_root(true).build()?;
//! let changes = diff(&source, &destination, ComparePolicy::metadata_only());
//!
//! let report = SyncExecutor::new("./src", "./dst").apply(&changes);
//! println!("{} files copied, {} failures", report.files_copied, report.failures.len());
//! report.into_result()?;
//! # Ok(())
//! # }
//! ```

use crate::diff::DiffList;
use crate::error::SyncError;
use crate::types::{ApplyFailure, ApplyOperation, ApplyReport, EntryType, FileEntry};
use crate::utils;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// A failed step while applying one entry
struct StepFailure {
    operation: ApplyOperation,
    error: SyncError,
}

impl StepFailure {
    fn new(operation: ApplyOperation, error: SyncError) -> Self {
        Self { operation, error }
    }
}

/// Attributes a directory gets back in the deferred pass
struct DirectoryRestore {
    mode: u32,
    modified: DateTime<Utc>,
}

/// Grants owner write on read-only destination directories for the duration of a run
struct Unlocker<'a> {
    root: &'a Path,
    unlocked: BTreeMap<PathBuf, DirectoryRestore>,
}

impl<'a> Unlocker<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            unlocked: BTreeMap::new(),
        }
    }

    /// Make the nearest existing ancestor of `target` writable by its owner
    fn unlock_parent(&mut self, target: &Path) -> std::result::Result<(), StepFailure> {
        let mut candidate = target.parent();
        while let Some(dir) = candidate {
            let relative = match dir.strip_prefix(self.root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => return Ok(()),
            };
            if self.unlocked.contains_key(&relative) {
                return Ok(());
            }

            let stat = if dir == self.root {
                utils::stat_root(dir)
            } else {
                utils::stat_entry(dir)
            };
            match stat {
                Ok(meta) if meta.entry_type == Some(EntryType::Directory) => {
                    if meta.mode & 0o200 == 0 {
                        utils::set_permissions(dir, meta.mode | 0o200)
                            .map_err(|e| StepFailure::new(ApplyOperation::SetPermissions, e))?;
                        debug!("Granted owner write on {:?} until the run ends", dir);
                        self.unlocked.insert(
                            relative,
                            DirectoryRestore {
                                mode: meta.mode,
                                modified: meta.modified,
                            },
                        );
                    }
                    return Ok(());
                }
                Err(SyncError::PathNotFound { .. }) if dir != self.root => candidate = dir.parent(),
                // Anything else surfaces when the write itself is attempted
                _ => return Ok(()),
            }
        }
        Ok(())
    }
}

/// Replays diff entries from a source root onto a destination root
#[derive(Debug, Clone)]
pub struct SyncExecutor {
    source_root: PathBuf,
    destination_root: PathBuf,
    dry_run: bool,
}

impl SyncExecutor {
    /// Create an executor copying from `source_root` into `destination_root`
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            dry_run: false,
        }
    }

    /// Report what would be applied without writing anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Apply every entry of `diff`, in order
    ///
    /// Never fails as a whole; per-entry failures are collected in the
    /// returned report. An empty diff performs no filesystem writes, not
    /// even creating the destination root.
    #[instrument(skip(self, diff), fields(entries = diff.len(), dry_run = self.dry_run))]
    pub fn apply(&self, diff: &DiffList) -> ApplyReport {
        let start = Instant::now();
        let mut report = ApplyReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        if diff.is_empty() {
            debug!("Nothing to apply");
            return report;
        }

        if self.dry_run {
            for entry in diff.entries() {
                report.entries_processed += 1;
                match entry.entry_type {
                    EntryType::Directory => report.directories_created += 1,
                    EntryType::RegularFile => {
                        report.files_copied += 1;
                        report.bytes_copied += entry.size;
                    }
                }
            }
            report.duration_ms = start.elapsed().as_millis() as u64;
            info!(
                "Dry run: would create {} directories and copy {} files ({})",
                report.directories_created,
                report.files_copied,
                utils::format_bytes(report.bytes_copied)
            );
            return report;
        }

        if let Err(e) = fs::create_dir_all(&self.destination_root) {
            record(
                &mut report,
                Path::new(""),
                StepFailure::new(
                    ApplyOperation::CreateDirectory,
                    SyncError::from_io(&self.destination_root, e),
                ),
            );
        }

        let mut directories: Vec<&FileEntry> = Vec::new();
        let mut unlocker = Unlocker::new(&self.destination_root);

        for entry in diff.entries() {
            report.entries_processed += 1;
            let target = self.destination_root.join(&entry.relative_path);

            match entry.entry_type {
                EntryType::Directory => match ensure_directory(&target, &mut unlocker) {
                    Ok(created) => {
                        if created {
                            report.directories_created += 1;
                            trace!("Created directory {:?}", entry.relative_path);
                        }
                        directories.push(entry);
                    }
                    Err(failure) => record(&mut report, &entry.relative_path, failure),
                },
                EntryType::RegularFile => {
                    let source = self.source_root.join(&entry.relative_path);
                    self.copy_file(entry, &source, &target, &mut unlocker, &mut report);
                }
            }
        }

        // A directory in the diff takes the source's attributes over its pre-run ones
        let mut restores = unlocker.unlocked;
        for entry in directories {
            restores.insert(
                entry.relative_path.clone(),
                DirectoryRestore {
                    mode: entry.mode,
                    modified: entry.modified,
                },
            );
        }

        // Deepest first so restoring a parent's mtime comes after its children
        let mut restores: Vec<(PathBuf, DirectoryRestore)> = restores.into_iter().collect();
        restores.sort_by(|(a, _), (b, _)| b.components().count().cmp(&a.components().count()));
        for (relative_path, restore) in restores {
            let target = self.destination_root.join(&relative_path);
            for failure in restore_attributes(&target, restore.mode, &restore.modified) {
                record(&mut report, &relative_path, failure);
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Applied {} entries in {}ms: {} directories created, {} files copied ({}), {} failures",
            report.entries_processed,
            report.duration_ms,
            report.directories_created,
            report.files_copied,
            utils::format_bytes(report.bytes_copied),
            report.failures.len()
        );
        report
    }

    fn copy_file(
        &self,
        entry: &FileEntry,
        source: &Path,
        target: &Path,
        unlocker: &mut Unlocker<'_>,
        report: &mut ApplyReport,
    ) {
        let copied = match replace_file(source, target, unlocker) {
            Ok(copied) => copied,
            Err(failure) => {
                record(report, &entry.relative_path, failure);
                return;
            }
        };

        if copied != entry.size {
            let warning = format!(
                "{:?} changed while copying: expected {} bytes, copied {}",
                entry.relative_path, entry.size, copied
            );
            warn!("{}", warning);
            report.warnings.push(warning);
        }

        report.files_copied += 1;
        report.bytes_copied += copied;
        trace!("Copied {:?} ({} bytes)", entry.relative_path, copied);

        for failure in restore_attributes(target, entry.mode, &entry.modified) {
            record(report, &entry.relative_path, failure);
        }
    }
}

/// Make `target` a directory; returns whether it had to be created
fn ensure_directory(target: &Path, unlocker: &mut Unlocker<'_>) -> std::result::Result<bool, StepFailure> {
    match utils::stat_entry(target) {
        Ok(meta) if meta.entry_type == Some(EntryType::Directory) => return Ok(false),
        Ok(_) => {
            unlocker.unlock_parent(target)?;
            remove_conflicting(target)?;
        }
        Err(SyncError::PathNotFound { .. }) => unlocker.unlock_parent(target)?,
        Err(e) => return Err(StepFailure::new(ApplyOperation::CreateDirectory, e)),
    }

    fs::create_dir_all(target)
        .map_err(|e| StepFailure::new(ApplyOperation::CreateDirectory, SyncError::from_io(target, e)))?;
    Ok(true)
}

/// Copy `source` over `target`, creating parents and clearing a directory in the way
fn replace_file(
    source: &Path,
    target: &Path,
    unlocker: &mut Unlocker<'_>,
) -> std::result::Result<u64, StepFailure> {
    unlocker.unlock_parent(target)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StepFailure::new(ApplyOperation::CreateDirectory, SyncError::from_io(parent, e)))?;
    }

    match utils::stat_entry(target) {
        Ok(meta) if meta.entry_type == Some(EntryType::Directory) => remove_conflicting(target)?,
        Ok(_) | Err(SyncError::PathNotFound { .. }) => {}
        Err(e) => return Err(StepFailure::new(ApplyOperation::CopyFile, e)),
    }

    utils::copy_bytes(source, target).map_err(|e| StepFailure::new(ApplyOperation::CopyFile, e))
}

fn remove_conflicting(target: &Path) -> std::result::Result<(), StepFailure> {
    debug!("Removing conflicting entry at {:?}", target);
    let result = match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(target),
        Ok(_) => fs::remove_file(target),
        Err(e) => Err(e),
    };
    result.map_err(|e| StepFailure::new(ApplyOperation::RemoveConflicting, SyncError::from_io(target, e)))
}

/// Restore permission bits and mtime; both are attempted independently
fn restore_attributes(target: &Path, mode: u32, modified: &DateTime<Utc>) -> Vec<StepFailure> {
    let mut failures = Vec::new();
    if let Err(e) = utils::set_permissions(target, mode) {
        failures.push(StepFailure::new(ApplyOperation::SetPermissions, e));
    }
    if let Err(e) = utils::set_modified(target, modified) {
        failures.push(StepFailure::new(ApplyOperation::SetModified, e));
    }
    failures
}

fn record(report: &mut ApplyReport, path: &Path, failure: StepFailure) {
    warn!("Failed to {} {:?}: {}", failure.operation, path, failure.error);
    report.failures.push(ApplyFailure {
        path: path.to_path_buf(),
        operation: failure.operation,
        message: failure.error.to_string(),
    });
}
