//! Main test module for git-backup
//!
//! This module includes all test suites:
//! - Integration tests against a real git binary
//! - Property-based tests for the pure path logic and revision counting
//! - Edge cases: awkward file names, attributes, store corner cases
//!
//! Suites that need git skip themselves when no `git` is on `PATH`.

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use crate::integration::{git_available, GitHarness};
    use ::git_backup::*;
    use std::fs;

    #[test]
    fn test_special_filenames() {
        if !git_available() {
            eprintln!("skipping: git not found");
            return;
        }
        let harness = GitHarness::new(CombinePolicy::NeverAsk);

        // Pathspec magic characters must be taken literally.
        let special_names = [
            "file with spaces.txt",
            "file*star.txt",
            "file?question.txt",
            "file[with]brackets.txt",
            ":(glob)magic.txt",
            "ünïcödé.txt",
            "-leading-dash.txt",
        ];

        for name in &special_names {
            let path = harness.write(name, name.as_bytes());
            assert!(harness.backup.backup(&path).unwrap(), "backup of {}", name);
        }

        for name in &special_names {
            let path = harness.path(name);
            let revisions = harness.backup.list_revisions(&path).unwrap();
            assert_eq!(revisions.len(), 1, "revisions of {}", name);
            let content = harness.backup.fetch_content(&revisions[0].id, &path).unwrap();
            assert_eq!(content.as_deref(), Some(name.as_bytes()));
        }

        // Removing the glob-looking name leaves the others alone.
        let star = harness.path("file*star.txt");
        assert_eq!(harness.backup.remove_file(&star).unwrap(), RemoveOutcome::Removed);
        assert!(harness.backup.list_revisions(&star).unwrap().is_empty());
        assert_eq!(
            harness.backup.list_revisions(&harness.path("file with spaces.txt")).unwrap().len(),
            1
        );
        assert_eq!(harness.backup.tracked_files().unwrap().len(), special_names.len() - 1);
    }

    #[test]
    fn test_binary_and_empty_content_round_trip() {
        if !git_available() {
            eprintln!("skipping: git not found");
            return;
        }
        let harness = GitHarness::new(CombinePolicy::NeverAsk);

        let binary: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let bin_path = harness.write("blob.bin", &binary);
        let empty_path = harness.write("empty.txt", b"");
        let crlf_path = harness.write("crlf.txt", b"one\r\ntwo\r\n\n\n");

        for path in [&bin_path, &empty_path, &crlf_path] {
            harness.backup.backup(path).unwrap();
        }

        let fetch = |path: &std::path::Path| {
            let rev = harness.backup.list_revisions(path).unwrap()[0].id.clone();
            harness.backup.fetch_content(&rev, path).unwrap().unwrap()
        };
        assert_eq!(fetch(&bin_path), binary);
        assert_eq!(fetch(&empty_path), b"");
        assert_eq!(fetch(&crlf_path), b"one\r\ntwo\r\n\n\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_and_mtime_are_kept_in_store() {
        use std::os::unix::fs::PermissionsExt;

        if !git_available() {
            eprintln!("skipping: git not found");
            return;
        }
        let harness = GitHarness::new(CombinePolicy::NeverAsk);
        let script = harness.write("run.sh", b"#!/bin/sh\necho hi\n");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&script, mtime).unwrap();

        harness.backup.backup(&script).unwrap();

        let stored = path_map::store_location(harness.backup.store().root(), &script).unwrap();
        let metadata = fs::metadata(&stored).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o755);
        assert_eq!(filetime::FileTime::from_last_modification_time(&metadata), mtime);
    }

    #[test]
    fn test_directory_and_missing_paths_are_no_ops() {
        if !git_available() {
            eprintln!("skipping: git not found");
            return;
        }
        let harness = GitHarness::new(CombinePolicy::NeverAsk);

        assert!(!harness.backup.on_save(harness.home.path()).unwrap());
        assert!(!harness.backup.on_save(&harness.path("missing.txt")).unwrap());
        assert!(!harness.backup.on_save(std::path::Path::new("")).unwrap());
        assert!(!harness.backup.is_initialized());
        assert!(harness.backup.tracked_files().unwrap().is_empty());
    }

    #[test]
    fn test_fetch_rejects_option_like_revisions() {
        if !git_available() {
            eprintln!("skipping: git not found");
            return;
        }
        let harness = GitHarness::new(CombinePolicy::NeverAsk);
        let file = harness.write("notes.txt", b"a");
        harness.backup.backup(&file).unwrap();

        for rev in ["--all", "HEAD", "HEAD~0", "master", "abc", "zzzz"] {
            assert_eq!(harness.backup.fetch_content(rev, &file).unwrap(), None, "rev {}", rev);
        }
    }
}
