//! # Treesync - One-way directory tree synchronization
//!
//! A local directory synchronizer that makes a destination tree match a
//! source tree, copying new and changed files and directories while
//! preserving permission bits and modification times.
//!
//! ## Overview
//!
//! A run has four phases:
//! - **Build**: inventory both trees into ordered [`FileTree`]s, either on the
//!   calling thread or with a pool of lister and analyzer workers
//! - **Diff**: walk both trees in lockstep and list the source entries that
//!   are missing from or different in the destination
//! - **Apply**: create directories, copy file content and restore attributes
//!   on the destination, collecting per-entry failures
//! - **Teardown**: terminate every worker and wait for its acknowledgement
//!
//! The source always wins. Nothing is ever deleted from the destination
//! except an object of the wrong type standing where a source entry goes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use treesync::SyncEngineBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let report = SyncEngineBuilder::new()
//!     .build("./project", "/mnt/backup/project")?
//!     .run()?;
//!
//! println!(
//!     "{} directories created, {} files copied",
//!     report.apply.directories_created, report.apply.files_copied
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Comparison
//!
//! Two entries with the same relative path are considered equal when:
//! - both are regular files with the same size and modification time (to
//!   the nanosecond) and, when content hashing is enabled, the same MD5
//!   fingerprint
//! - both are directories with the same permission mode
//!
//! Disabling content hashing makes a run much cheaper on large trees at the
//! cost of missing edits that keep both size and mtime.
//!
//! ## Parallel Mode
//!
//! In parallel mode the [`Coordinator`] spawns one lister per side and a pool
//! of analyzers. They share nothing but a [`protocol::MessageBus`]: listers
//! walk directories and hand paths to analyzers, which read metadata and
//! fingerprints and reply to the coordinator. Replies arrive in any order and
//! are put back in tree order by sorted insertion.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, SyncError>`. Tree building is all or
//! nothing: any entry that cannot be read aborts the run. Applying is best
//! effort: failures are collected in [`ApplyReport`] and surface as
//! [`SyncError::PartialApplyFailure`] through [`SyncReport::into_result`].
//!
//! ## Module Organization
//!
//! - [`tree`]: Ordered file tree and bounded cursor
//! - [`scanner`]: Directory walk and serial tree builder
//! - [`protocol`]: Addresses, commands and the message bus
//! - [`worker`]: Lister and analyzer workers
//! - [`coordinator`]: Worker pool ownership and parallel tree building
//! - [`diff`]: Mismatch predicate and diff computation
//! - [`sync`]: Applying a diff to the destination
//! - [`engine`]: End-to-end runs and configuration builder
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

pub mod coordinator;
pub mod diff;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod scanner;
pub mod sync;
pub mod tree;
pub mod types;
pub mod utils;
pub mod worker;

// Re-export main types for convenience
pub use coordinator::Coordinator;
pub use diff::{diff, mismatch, DiffItem, DiffList};
pub use engine::{SyncEngine, SyncEngineBuilder, SyncReport};
pub use error::{Result, SyncError};
pub use scanner::TreeBuilder;
pub use sync::SyncExecutor;
pub use tree::{FileTree, TreeCursor};
pub use types::*;
