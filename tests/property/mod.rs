//! Property-based testing for treesync
//!
//! Uses proptest to verify ordering, comparison and convergence invariants
//! across randomly generated trees.

use ::treesync::*;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Generate random relative paths
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let component = prop_oneof![
        "[a-z]{1,6}",
        "[A-Z][a-z]{0,4}",
        "[a-z]{1,3}[-_.][a-z]{1,3}",
        "dir[0-9]{1,2}",
    ];
    prop::collection::vec(component, 1..=4).prop_map(|parts| parts.iter().collect())
}

/// Generate a synthetic entry at a random path
fn entry_strategy() -> impl Strategy<Value = FileEntry> {
    (
        path_strategy(),
        any::<bool>(),
        0u64..10_000,
        0i64..2_000_000_000,
        0u32..1_000_000_000,
        prop::option::of(any::<[u8; 16]>()),
    )
        .prop_map(|(path, is_dir, size, secs, nanos, digest)| FileEntry {
            absolute_path: PathBuf::from("/src").join(&path),
            relative_path: path,
            entry_type: if is_dir { EntryType::Directory } else { EntryType::RegularFile },
            size,
            modified: Utc.timestamp_opt(secs, nanos).unwrap(),
            mode: if is_dir { 0o40755 } else { 0o100644 },
            fingerprint: if is_dir { None } else { digest.map(Fingerprint) },
        })
}

/// Files to create on disk: relative path and content
fn disk_tree_strategy() -> impl Strategy<Value = Vec<(PathBuf, Vec<u8>)>> {
    let file = (
        prop::collection::vec("[a-c]{1,2}", 0..=2),
        "[a-z]{1,6}\\.(txt|bin)",
        prop::collection::vec(any::<u8>(), 0..256),
    )
        .prop_map(|(dirs, name, content)| {
            let mut path: PathBuf = dirs.iter().map(|d| format!("d_{}", d)).collect();
            path.push(name);
            (path, content)
        });
    prop::collection::vec(file, 0..20)
}

fn write_tree(root: &Path, files: &[(PathBuf, Vec<u8>)]) {
    fs::create_dir_all(root).unwrap();
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn build_tree(entries: &[FileEntry]) -> FileTree {
    let mut tree = FileTree::new(PathBuf::from("/src"));
    for entry in entries {
        tree.insert(entry.clone());
    }
    tree
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any arrival order yields the same ordered, duplicate-free tree
    #[test]
    fn insertion_order_independent(
        entries in prop::collection::vec(entry_strategy(), 0..60),
        seed in any::<u64>(),
    ) {
        // Keep the first entry per path so both orders agree on duplicates
        let mut unique: Vec<FileEntry> = Vec::new();
        for entry in entries {
            if !unique.iter().any(|e| e.relative_path == entry.relative_path) {
                unique.push(entry);
            }
        }

        let mut shuffled = unique.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

        let ordered = build_tree(&unique);
        let reordered = build_tree(&shuffled);
        prop_assert_eq!(&ordered, &reordered);
        prop_assert_eq!(ordered.len(), unique.len());

        let keys: Vec<&PathBuf> = ordered.iter().map(|e| &e.relative_path).collect();
        for pair in keys.windows(2) {
            prop_assert_eq!(utils::compare_paths(pair[0], pair[1]), Ordering::Less);
        }
    }

    /// A tree never differs from itself
    #[test]
    fn diff_reflexive(entries in prop::collection::vec(entry_strategy(), 0..60)) {
        let tree = build_tree(&entries);
        prop_assert!(diff(&tree, &tree, ComparePolicy::metadata_only()).is_empty());
        prop_assert!(diff(&tree, &tree, ComparePolicy::with_content_hash()).is_empty());
    }

    /// Metadata-only mismatch is symmetric
    #[test]
    fn mismatch_symmetric(a in entry_strategy(), b in entry_strategy(), same_name in any::<bool>()) {
        let mut b = b;
        if same_name {
            b.relative_path = a.relative_path.clone();
        }
        let policy = ComparePolicy::metadata_only();
        prop_assert_eq!(mismatch(&a, &b, policy), mismatch(&b, &a, policy));
    }

    /// Every diff item is either missing from the destination or mismatching
    #[test]
    fn diff_classification(
        source in prop::collection::vec(entry_strategy(), 0..40),
        destination in prop::collection::vec(entry_strategy(), 0..40),
    ) {
        let source = build_tree(&source);
        let destination = build_tree(&destination);
        let policy = ComparePolicy::with_content_hash();
        let changes = diff(&source, &destination, policy);

        for item in changes.items() {
            match (destination.get(&item.entry.relative_path), item.change) {
                (None, ChangeKind::Added) => {}
                (Some(existing), ChangeKind::Changed) => {
                    prop_assert!(mismatch(&item.entry, existing, policy));
                }
                (found, change) => prop_assert!(false, "{:?} classified {:?}", found.is_some(), change),
            }
        }

        let listed = changes.len();
        let unchanged = source
            .iter()
            .filter(|e| destination.get(&e.relative_path).map(|d| !mismatch(e, d, policy)).unwrap_or(false))
            .count();
        prop_assert_eq!(listed + unchanged, source.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// diff, apply, rebuild, diff again is empty
    #[test]
    fn apply_converges(
        source_files in disk_tree_strategy(),
        destination_files in disk_tree_strategy(),
        content_hash in any::<bool>(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        write_tree(&src, &source_files);
        write_tree(&dst, &destination_files);

        let policy = ComparePolicy { use_content_hash: content_hash };
        let scan = |root: &Path| {
            TreeBuilder::new(root)
                .with_content_hash(content_hash)
                .build()
                .unwrap()
        };

        let changes = diff(&scan(&src), &scan(&dst), policy);
        let report = SyncExecutor::new(&src, &dst).apply(&changes);
        prop_assert!(report.is_success(), "{:?}", report.failures);

        prop_assert!(diff(&scan(&src), &scan(&dst), policy).is_empty());
    }
}
