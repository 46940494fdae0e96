//! End-to-end integration tests for treesync
//!
//! Builds randomized source trees, synchronizes them and checks that the
//! destination converges, in serial and parallel mode.

use ::treesync::*;
use filetime::FileTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Test harness owning a source and destination pair
pub struct SyncTestHarness {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub generator: TreeGenerator,
}

impl SyncTestHarness {
    /// Create a harness with an empty source and no destination
    pub fn new(seed: u64) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("destination");
        fs::create_dir(&source).unwrap();

        Self {
            temp_dir,
            source,
            destination,
            generator: TreeGenerator::new(seed),
        }
    }

    /// Run the engine with the given mode and hashing policy
    pub fn sync(&self, parallel: bool, content_hash: bool) -> SyncReport {
        SyncEngineBuilder::new()
            .worker_count(6)
            .parallel(parallel)
            .content_hash(content_hash)
            .build(&self.source, &self.destination)
            .unwrap()
            .run()
            .unwrap()
    }

    /// Diff a fresh scan of both sides
    pub fn remaining_diff(&self, content_hash: bool) -> DiffList {
        let source = TreeBuilder::new(&self.source)
            .with_content_hash(content_hash)
            .build()
            .unwrap();
        let destination = TreeBuilder::new(&self.destination)
            .with_content_hash(content_hash)
            .allow_missing_root(true)
            .build()
            .unwrap();
        let policy = ComparePolicy {
            use_content_hash: content_hash,
        };
        diff(&source, &destination, policy)
    }
}

/// Deterministic random tree content
pub struct TreeGenerator {
    rng: StdRng,
}

impl TreeGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Populate `root` with `files` files spread over nested directories
    pub fn populate(&mut self, root: &Path, files: usize) -> Vec<PathBuf> {
        let mut created = Vec::with_capacity(files);
        for i in 0..files {
            let depth = self.rng.random_range(0..4);
            let mut path = PathBuf::new();
            for _ in 0..depth {
                path.push(format!("dir{}", self.rng.random_range(0..5)));
            }
            path.push(format!("file{}.bin", i));

            let size = self.rng.random_range(16..4096);
            let content: Vec<u8> = (0..size).map(|_| self.rng.random()).collect();

            let full = root.join(&path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, content).unwrap();
            created.push(path);
        }
        created
    }

    /// Rewrite some of `paths` under `root`, keeping size and mtime when `sneaky`
    pub fn mutate(&mut self, root: &Path, paths: &[PathBuf], count: usize, sneaky: bool) -> Vec<PathBuf> {
        let mut mutated = Vec::new();
        for _ in 0..count {
            let path = &paths[self.rng.random_range(0..paths.len())];
            let full = root.join(path);
            let meta = fs::metadata(&full).unwrap();
            let len = meta.len() as usize;

            let content: Vec<u8> = if sneaky {
                (0..len).map(|_| self.rng.random()).collect()
            } else {
                (0..len + 1 + self.rng.random_range(0..64)).map(|_| self.rng.random()).collect()
            };
            fs::write(&full, content).unwrap();
            if sneaky {
                filetime::set_file_mtime(&full, FileTime::from_last_modification_time(&meta)).unwrap();
            }
            mutated.push(path.clone());
        }
        mutated
    }
}

#[test]
fn test_scenario_nested_file_into_empty_destination() {
    let harness = SyncTestHarness::new(1);
    fs::create_dir(harness.source.join("a")).unwrap();
    let file = harness.source.join("a/f.txt");
    fs::write(&file, b"0123456789").unwrap();
    let t1 = FileTime::from_unix_time(1_650_000_000, 987_654_321);
    filetime::set_file_mtime(&file, t1).unwrap();

    let report = harness.sync(false, false);
    let listed: Vec<_> = report.diff.entries().map(|e| e.relative_path.clone()).collect();
    assert_eq!(listed, vec![PathBuf::from("a"), PathBuf::from("a/f.txt")]);

    let copied = harness.destination.join("a/f.txt");
    let meta = fs::metadata(&copied).unwrap();
    assert!(harness.destination.join("a").is_dir());
    assert_eq!(meta.len(), 10);
    assert_eq!(FileTime::from_last_modification_time(&meta), t1);
    assert_eq!(
        utils::stat_entry(&copied).unwrap().mode,
        utils::stat_entry(&file).unwrap().mode
    );
}

#[test]
fn test_scenario_hash_catches_same_metadata_edit() {
    let mut harness = SyncTestHarness::new(2);
    let paths = harness.generator.populate(&harness.source.clone(), 20);
    harness.sync(false, true);

    let destination = harness.destination.clone();
    let mutated = harness.generator.mutate(&destination, &paths, 1, true);

    // Metadata alone cannot see the edit
    assert!(harness.sync(false, false).diff.is_empty());

    let report = harness.sync(false, true);
    let listed: Vec<_> = report.diff.entries().map(|e| e.relative_path.clone()).collect();
    assert_eq!(listed, mutated);
    assert_eq!(report.diff.stats().changed, 1);
    assert!(harness.remaining_diff(true).is_empty());
}

#[test]
fn test_scenario_identical_trees_write_nothing() {
    let mut harness = SyncTestHarness::new(3);
    harness.generator.populate(&harness.source.clone(), 30);
    harness.sync(false, false);

    let before = TreeBuilder::new(&harness.destination).build().unwrap();
    let root_mtime = fs::metadata(&harness.destination).unwrap().modified().unwrap();

    let report = harness.sync(false, false);
    assert!(report.diff.is_empty());
    assert_eq!(report.apply.entries_processed, 0);

    let after = TreeBuilder::new(&harness.destination).build().unwrap();
    assert_eq!(before, after);
    assert_eq!(fs::metadata(&harness.destination).unwrap().modified().unwrap(), root_mtime);
}

#[test]
fn test_convergence_after_changes() {
    let mut harness = SyncTestHarness::new(4);
    let source = harness.source.clone();
    let paths = harness.generator.populate(&source, 60);

    for content_hash in [false, true] {
        harness.sync(true, content_hash);
        assert!(harness.remaining_diff(content_hash).is_empty());

        harness.generator.mutate(&source, &paths, 10, false);
        harness.generator.populate(&source.join("fresh"), 5);

        let report = harness.sync(true, content_hash);
        assert!(report.is_success());
        assert!(report.diff.stats().has_changes());
        assert!(harness.remaining_diff(content_hash).is_empty());
    }
}

#[test]
fn test_serial_and_parallel_trees_identical() {
    let mut harness = SyncTestHarness::new(5);
    harness.generator.populate(&harness.source.clone(), 120);

    let serial = TreeBuilder::new(&harness.source).with_content_hash(true).build().unwrap();
    for workers in [1, 3, 4, 9] {
        let mut coordinator = Coordinator::spawn(&SyncConfig {
            worker_count: workers,
            ..Default::default()
        })
        .unwrap();
        let (parallel, destination) = coordinator
            .build_trees(&harness.source, &harness.destination)
            .unwrap();
        coordinator.shutdown().unwrap();

        assert_eq!(parallel, serial, "{} workers", workers);
        assert!(destination.is_empty());
    }
}

#[test]
fn test_partial_failure_does_not_stop_others() {
    let mut harness = SyncTestHarness::new(6);
    let paths = harness.generator.populate(&harness.source.clone(), 10);

    let source = TreeBuilder::new(&harness.source).build().unwrap();
    let destination = FileTree::new(harness.destination.clone());
    let changes = diff(&source, &destination, ComparePolicy::metadata_only());

    // Vanishes between diff and apply
    fs::remove_file(harness.source.join(&paths[0])).unwrap();

    let report = SyncExecutor::new(&harness.source, &harness.destination).apply(&changes);
    assert_eq!(report.failed_entries(), 1);
    assert_eq!(report.files_copied, 9);
    assert_eq!(report.failures[0].path, paths[0]);
    for path in &paths[1..] {
        assert!(harness.destination.join(path).exists());
    }
    assert!(matches!(
        report.into_result(),
        Err(SyncError::PartialApplyFailure { failed: 1, .. })
    ));
}

#[cfg(test)]
mod logging {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_large_tree_parallel() {
        let mut harness = SyncTestHarness::new(7);
        harness.generator.populate(&harness.source.clone(), 500);

        let report = harness.sync(true, true);
        info!(
            "Synchronized {} entries ({} bytes)",
            report.source_entries,
            report.apply.bytes_copied
        );
        assert!(report.is_success());
        assert!(logs_contain("Synchronized"));
        assert!(harness.remaining_diff(true).is_empty());
    }
}
