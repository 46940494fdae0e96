//! Synchronization engine
//!
//! [`SyncEngine`] ties the pieces together for one run:
//!
//! 1. Validate the [`SyncConfig`]
//! 2. Build the source and destination trees, serially with [`TreeBuilder`]
//!    or with a worker pool through the [`Coordinator`]
//! 3. [`diff`] the trees
//! 4. Apply the diff with the [`SyncExecutor`] (skipped writes on dry runs)
//! 5. Shut the worker pool down
//!
//! Everything the run learned is returned in a [`SyncReport`], including
//! both trees and the diff list for listings.
//!
//! ## Example
//!
//! ```rust,no_run
//! use treesync::SyncEngineBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngineBuilder::new()
//!     .worker_count(8)
//!     .content_hash(false)
//!     .build("./photos", "/mnt/backup/photos")?;
//!
//! let report = engine.run()?;
//! println!("{} entries applied", report.diff.len());
//! report.into_result()?;
//! # Ok(())
//! # }
//! ```

use crate::coordinator::Coordinator;
use crate::diff::{diff, DiffList};
use crate::error::{Result, SyncError};
use crate::scanner::TreeBuilder;
use crate::sync::SyncExecutor;
use crate::tree::FileTree;
use crate::types::{ApplyReport, ShutdownReport, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// Everything produced by one synchronization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Entries found under the source root
    pub source_entries: usize,
    /// Entries found under the destination root before applying
    pub destination_entries: usize,
    /// Entries that differed
    pub diff: DiffList,
    /// Outcome of the apply phase
    pub apply: ApplyReport,
    /// Worker teardown outcome, parallel runs only
    pub shutdown: Option<ShutdownReport>,
    /// Wall time of the whole run in milliseconds
    pub duration_ms: u64,
    /// Source tree, kept for listings
    #[serde(skip)]
    pub source_tree: FileTree,
    /// Destination tree as it was before applying
    #[serde(skip)]
    pub destination_tree: FileTree,
}

impl SyncReport {
    /// Whether every diff entry was applied
    pub fn is_success(&self) -> bool {
        self.apply.is_success()
    }

    /// Turn apply failures into [`SyncError::PartialApplyFailure`]
    pub fn into_result(self) -> Result<Self> {
        if self.apply.is_success() {
            Ok(self)
        } else {
            Err(SyncError::PartialApplyFailure {
                failed: self.apply.failed_entries(),
                total: self.apply.entries_processed,
            })
        }
    }
}

/// One configured synchronization run
#[derive(Debug, Clone)]
pub struct SyncEngine {
    config: SyncConfig,
}

impl SyncEngine {
    /// Create an engine for a validated configuration
    ///
    /// # Errors
    ///
    /// Any error from [`SyncConfig::validate`].
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this engine runs with
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Build, compare and apply
    ///
    /// Per-entry apply failures do not make this fail; they are in
    /// [`SyncReport::apply`]. Tree build failures and protocol violations do.
    #[instrument(skip(self), fields(
        source = %self.config.source_path.display(),
        destination = %self.config.destination_path.display(),
        parallel = self.config.parallel,
    ))]
    pub fn run(&self) -> Result<SyncReport> {
        let start = Instant::now();
        self.config.validate()?;

        let config = &self.config;
        let policy = config.compare_policy();

        let (source_tree, destination_tree, coordinator) = if config.parallel {
            let mut coordinator = Coordinator::spawn(config)?;
            let (source, destination) =
                coordinator.build_trees(&config.source_path, &config.destination_path)?;
            (source, destination, Some(coordinator))
        } else {
            let source = TreeBuilder::new(&config.source_path)
                .with_content_hash(config.use_content_hash)
                .build()?;
            let destination = TreeBuilder::new(&config.destination_path)
                .with_content_hash(config.use_content_hash)
                .allow_missing_root(true)
                .build()?;
            (source, destination, None)
        };
        debug!(
            "Trees built: {} source entries, {} destination entries",
            source_tree.len(),
            destination_tree.len()
        );

        let changes = diff(&source_tree, &destination_tree, policy);
        if config.verbose {
            info!("Source {}", source_tree);
            info!("Destination {}", destination_tree);
            info!("Differences: {}", changes);
        }

        let apply = SyncExecutor::new(&config.source_path, &config.destination_path)
            .dry_run(config.dry_run)
            .apply(&changes);

        let shutdown = match coordinator {
            Some(coordinator) => Some(shutdown_after_apply(coordinator.shutdown(), &apply)?),
            None => None,
        };

        let report = SyncReport {
            source_entries: source_tree.len(),
            destination_entries: destination_tree.len(),
            diff: changes,
            apply,
            shutdown,
            duration_ms: start.elapsed().as_millis() as u64,
            source_tree,
            destination_tree,
        };

        info!(
            "Synchronized {} of {} source entries in {}ms ({} failures)",
            report.diff.len(),
            report.source_entries,
            report.duration_ms,
            report.apply.failures.len()
        );
        Ok(report)
    }
}

/// Pass a worker shutdown result through, logging apply failures it would discard
fn shutdown_after_apply(result: Result<ShutdownReport>, apply: &ApplyReport) -> Result<ShutdownReport> {
    if let Err(e) = &result {
        error!("Worker shutdown failed after apply: {}", e);
        for failure in &apply.failures {
            error!("Unreported apply failure: {}", failure);
        }
    }
    result
}

/// Builder for a [`SyncEngine`]
///
/// # Examples
///
/// ```rust
/// use treesync::SyncEngineBuilder;
///
/// let builder = SyncEngineBuilder::new()
///     .worker_count(4)
///     .parallel(false)
///     .dry_run(true);
/// ```
#[derive(Debug, Clone)]
pub struct SyncEngineBuilder {
    config: SyncConfig,
}

impl SyncEngineBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    /// Total worker count in parallel mode, listers included
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Compare content fingerprints as well as size and mtime
    pub fn content_hash(mut self, enabled: bool) -> Self {
        self.config.use_content_hash = enabled;
        self
    }

    /// Build trees with the worker pool
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.config.parallel = enabled;
        self
    }

    /// Compute the diff without writing anything
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.config.dry_run = enabled;
        self
    }

    /// Ask for tree and diff listings
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.config.verbose = enabled;
        self
    }

    /// Build the engine for `source` and `destination`
    ///
    /// # Errors
    ///
    /// Any error from [`SyncConfig::validate`].
    pub fn build(self, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Result<SyncEngine> {
        let mut config = self.config;
        config.source_path = source.into();
        config.destination_path = destination.into();
        SyncEngine::new(config)
    }
}

impl Default for SyncEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
