//! Main test module for treesync
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end scenarios
//! - Protocol tests for worker coordination and shutdown
//! - Property-based tests for ordering and convergence invariants

pub mod integration;
pub mod property;
pub mod protocol;

#[cfg(test)]
mod edge_cases {
    use ::treesync::*;
    use std::fs;
    use tempfile::TempDir;

    fn sync(src: &std::path::Path, dst: &std::path::Path) -> SyncReport {
        SyncEngineBuilder::new()
            .parallel(false)
            .build(src, dst)
            .unwrap()
            .run()
            .unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src).unwrap();

        let report = sync(&src, &dst);
        assert_eq!(report.source_entries, 0);
        assert!(report.diff.is_empty());
        // Nothing to apply, nothing written
        assert!(!dst.exists());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src).unwrap();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "文件.txt",
            "файл.txt",
            "🦀.txt",
            ".hidden",
        ];
        for name in &special_names {
            fs::write(src.join(name), name.as_bytes()).unwrap();
        }

        let report = sync(&src, &dst);
        assert!(report.is_success());
        assert_eq!(report.apply.files_copied, special_names.len());
        for name in &special_names {
            assert_eq!(fs::read(dst.join(name)).unwrap(), name.as_bytes());
        }
    }

    #[test]
    fn test_deep_nesting() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");

        let mut deep = src.clone();
        for i in 0..40 {
            deep = deep.join(format!("level{}", i));
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("bottom.txt"), "bottom").unwrap();

        let report = sync(&src, &dst);
        assert!(report.is_success());
        assert_eq!(report.apply.directories_created, 40);

        let copied = dst.join(deep.strip_prefix(&src).unwrap()).join("bottom.txt");
        assert_eq!(fs::read_to_string(copied).unwrap(), "bottom");
    }

    #[test]
    fn test_empty_files() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src).unwrap();
        for i in 0..5 {
            fs::write(src.join(format!("empty{}", i)), b"").unwrap();
        }

        let report = sync(&src, &dst);
        assert_eq!(report.apply.files_copied, 5);
        assert_eq!(report.apply.bytes_copied, 0);
        assert!(report.apply.warnings.is_empty());
        assert!(sync(&src, &dst).diff.is_empty());
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = SyncEngineBuilder::new()
            .build(temp_dir.path().join("missing"), temp_dir.path().join("dst"))
            .unwrap_err();
        assert!(matches!(err, SyncError::PathNotFound { .. }));
    }

    #[test]
    fn test_destination_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&src).unwrap();
        fs::write(&dst, b"not a directory").unwrap();

        let err = SyncEngineBuilder::new().build(&src, &dst).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfiguration(_)));
    }
}
