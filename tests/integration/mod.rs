//! Integration tests against a real git binary
//!
//! Every scenario runs in its own pair of temporary directories: one plays
//! the user's filesystem, the other holds the backup store. Tests return
//! early when `git` is not installed.

use ::git_backup::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Whether a usable `git` is on `PATH`
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Test harness wrapping an engine over a fresh store
pub struct GitHarness {
    pub home: TempDir,
    pub store_dir: TempDir,
    pub backup: GitBackup,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl GitHarness {
    /// Engine that answers every confirmation with yes
    pub fn new(policy: CombinePolicy) -> Self {
        Self::with_answer(policy, true)
    }

    /// Engine whose confirmation prompt always answers `answer`
    pub fn with_answer(policy: CombinePolicy, answer: bool) -> Self {
        Self::build(policy, answer, Vec::new())
    }

    /// Engine with extra exclusion rules
    pub fn with_exclusions(rules: Vec<String>) -> Self {
        Self::build(CombinePolicy::NeverAsk, true, rules)
    }

    fn build(policy: CombinePolicy, answer: bool, rules: Vec<String>) -> Self {
        let home = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let recorded = prompts.clone();

        let backup = GitBackup::builder()
            .store_path(store_dir.path().join("store"))
            .combine_policy(policy)
            .exclusion_rules(rules)
            .command_timeout(Duration::from_secs(60))
            .confirm_with(move |prompt| {
                recorded.lock().unwrap().push(prompt.to_string());
                answer
            })
            .build()
            .unwrap();

        Self {
            home,
            store_dir,
            backup,
            prompts,
        }
    }

    /// Absolute path of `name` under the fake home directory
    pub fn path(&self, name: &str) -> PathBuf {
        self.home.path().join(name)
    }

    /// Write `content` to `name`, creating parent directories
    pub fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Write and back up in one step
    pub fn save(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.write(name, content);
        assert!(self.backup.on_save(&path).unwrap(), "save of {}", name);
        path
    }

    /// Contents of every revision of `path`, newest first
    pub fn contents(&self, path: &Path) -> Vec<Vec<u8>> {
        self.backup
            .list_revisions(path)
            .unwrap()
            .iter()
            .map(|rev| self.backup.fetch_content(&rev.id, path).unwrap().unwrap())
            .collect()
    }

    /// Number of commits reachable from the store's HEAD
    pub fn commit_count(&self) -> usize {
        let output = Command::new("git")
            .arg("-C")
            .arg(self.backup.store().root())
            .args(["rev-list", "--count", "HEAD"])
            .output()
            .unwrap();
        if !output.status.success() {
            return 0;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().unwrap()
    }
}

#[test]
fn test_save_list_fetch_round_trip() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let notes = harness.save("notes.txt", b"a");
    harness.save("notes.txt", b"b");

    let revisions = harness.backup.list_revisions(&notes).unwrap();
    assert_eq!(revisions.len(), 2);
    assert!(revisions.iter().all(|r| r.id.len() == 40));
    assert!(revisions.iter().all(|r| !r.label.is_empty()));
    assert!(revisions.iter().all(|r| r.committed_at.is_some()));

    assert_eq!(harness.contents(&notes), vec![b"b".to_vec(), b"a".to_vec()]);
    assert!(harness.backup.store().root().join(".git").is_dir());

    // Snapshot mirrors the real path.
    let stored = path_map::store_location(harness.backup.store().root(), &notes).unwrap();
    assert_eq!(fs::read(stored).unwrap(), b"b");
}

#[test]
fn test_unchanged_content_still_creates_revisions() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let path = harness.save("same.txt", b"unchanged");
    harness.backup.backup(&path).unwrap();

    let revisions = harness.backup.list_revisions(&path).unwrap();
    assert_eq!(revisions.len(), 2);
    assert_ne!(revisions[0].id, revisions[1].id);
    assert_eq!(harness.contents(&path), vec![b"unchanged".to_vec(), b"unchanged".to_vec()]);
}

#[test]
fn test_revisions_are_per_file() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let a = harness.save("a.txt", b"a1");
    let b = harness.save("b.txt", b"b1");
    harness.save("a.txt", b"a2");

    assert_eq!(harness.backup.list_revisions(&a).unwrap().len(), 2);
    assert_eq!(harness.backup.list_revisions(&b).unwrap().len(), 1);

    // The first commit predates b, so it holds nothing for b.
    let first_a = harness.backup.list_revisions(&a).unwrap()[1].id.clone();
    assert_eq!(harness.backup.fetch_content(&first_a, &b).unwrap(), None);

    // b's commit still sees a as it was then.
    let b_rev = harness.backup.list_revisions(&b).unwrap()[0].id.clone();
    assert_eq!(harness.backup.fetch_content(&b_rev, &b).unwrap(), Some(b"b1".to_vec()));
    assert_eq!(harness.backup.fetch_content(&b_rev, &a).unwrap(), Some(b"a1".to_vec()));

    let mut tracked = harness.backup.tracked_files().unwrap();
    tracked.sort();
    assert_eq!(tracked, vec![a, b]);
}

#[test]
fn test_trailing_space_name_keeps_its_own_history() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let plain = harness.save("notes", b"plain");
    harness.save("notes ", b"padded 1");
    let padded = harness.save("notes ", b"padded 2");

    assert_eq!(harness.contents(&plain), vec![b"plain".to_vec()]);
    assert_eq!(
        harness.contents(&padded),
        vec![b"padded 2".to_vec(), b"padded 1".to_vec()]
    );

    assert_eq!(harness.backup.remove_file(&padded).unwrap(), RemoveOutcome::Removed);
    assert!(harness.backup.list_revisions(&padded).unwrap().is_empty());
    assert_eq!(harness.contents(&plain), vec![b"plain".to_vec()]);
    assert_eq!(harness.commit_count(), 1);
}

#[test]
fn test_label_format_is_applied() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let home = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let backup = GitBackup::builder()
        .store_path(store.path().join("store"))
        .log_format("%h|%s|%cd")
        .date_format("%Y")
        .build()
        .unwrap();

    let path = home.path().join("label.txt");
    fs::write(&path, "x").unwrap();
    backup.backup(&path).unwrap();

    let revisions = backup.list_revisions(&path).unwrap();
    let parts: Vec<&str> = revisions[0].label.split('|').collect();
    assert_eq!(parts.len(), 3);
    assert!(revisions[0].id.starts_with(parts[0]));
    assert_eq!(parts[1], "backup");
    assert_eq!(parts[2].len(), 4);
    assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn test_remove_only_file_drops_history() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let notes = harness.save("notes.txt", b"a");
    harness.save("notes.txt", b"b");
    let old_ids: Vec<String> = harness
        .backup
        .list_revisions(&notes)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();

    assert_eq!(harness.backup.remove_file(&notes).unwrap(), RemoveOutcome::Removed);

    assert!(harness.backup.list_revisions(&notes).unwrap().is_empty());
    for id in &old_ids {
        assert_eq!(harness.backup.fetch_content(id, &notes).unwrap(), None);
    }
    assert!(harness.backup.tracked_files().unwrap().is_empty());
    assert!(!path_map::store_location(harness.backup.store().root(), &notes)
        .unwrap()
        .exists());

    // The real file is never touched.
    assert_eq!(fs::read(&notes).unwrap(), b"b");

    // The store is still usable afterwards.
    harness.save("notes.txt", b"c");
    assert_eq!(harness.contents(&notes), vec![b"c".to_vec()]);
}

#[test]
fn test_remove_with_other_files_rewrites_history() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let keep = harness.save("keep.txt", b"k1");
    let drop = harness.save("dir/drop.txt", b"d1");
    harness.save("keep.txt", b"k2");
    harness.save("dir/drop.txt", b"d2");
    harness.save("keep.txt", b"k3");
    assert_eq!(harness.commit_count(), 5);

    let dropped_ids: Vec<String> = harness
        .backup
        .list_revisions(&drop)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();

    assert_eq!(harness.backup.remove_file(&drop).unwrap(), RemoveOutcome::Removed);

    assert!(harness.backup.list_revisions(&drop).unwrap().is_empty());
    for id in &dropped_ids {
        assert_eq!(harness.backup.fetch_content(id, &drop).unwrap(), None);
    }
    assert_eq!(harness.commit_count(), 3);
    assert_eq!(
        harness.contents(&keep),
        vec![b"k3".to_vec(), b"k2".to_vec(), b"k1".to_vec()]
    );
    assert_eq!(harness.backup.tracked_files().unwrap(), vec![keep]);
    assert!(!harness.store_dir.path().join("store").join(
        path_map::to_store_relative(drop.parent().unwrap()).unwrap()
    ).exists());
}

#[test]
fn test_remove_without_history_is_a_no_op() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);
    let never_saved = harness.write("never.txt", b"x");

    assert_eq!(
        harness.backup.remove_file(&never_saved).unwrap(),
        RemoveOutcome::NothingToRemove
    );

    harness.save("other.txt", b"o");
    assert_eq!(
        harness.backup.request_remove(&never_saved).unwrap(),
        RemoveOutcome::NothingToRemove
    );
    assert_eq!(harness.commit_count(), 1);
}

#[test]
fn test_combine_leaves_one_revision_of_current_content() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::AlwaysAsk);

    let other = harness.save("other.txt", b"o1");
    let notes = harness.save("notes.txt", b"v1");
    harness.save("notes.txt", b"v2");
    harness.save("notes.txt", b"v3");

    assert_eq!(harness.backup.request_combine(&notes).unwrap(), CombineOutcome::Combined);

    let prompts = harness.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("Combine all 3 backups of"));

    assert_eq!(harness.contents(&notes), vec![b"v3".to_vec()]);
    assert_eq!(harness.contents(&other), vec![b"o1".to_vec()]);
    assert_eq!(harness.commit_count(), 2);
}

#[test]
fn test_combine_after_source_deleted_only_removes() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let notes = harness.save("notes.txt", b"v1");
    harness.save("notes.txt", b"v2");
    fs::remove_file(&notes).unwrap();

    assert_eq!(harness.backup.combine(&notes, false).unwrap(), CombineOutcome::RemovedOnly);
    assert!(harness.backup.list_revisions(&notes).unwrap().is_empty());
}

#[test]
fn test_declined_rewrite_changes_nothing() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::with_answer(CombinePolicy::AlwaysAsk, false);

    let notes = harness.save("notes.txt", b"v1");
    harness.save("notes.txt", b"v2");

    assert_eq!(harness.backup.request_remove(&notes).unwrap(), RemoveOutcome::Declined);
    assert_eq!(harness.backup.request_combine(&notes).unwrap(), CombineOutcome::Declined);
    assert_eq!(harness.contents(&notes), vec![b"v2".to_vec(), b"v1".to_vec()]);

    let prompts = harness.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].starts_with("Remove all 2 backups of"));
}

#[test]
fn test_disabled_policy_refuses_rewrites() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::Disabled);
    let notes = harness.save("notes.txt", b"v1");

    assert!(matches!(
        harness.backup.request_combine(&notes),
        Err(BackupError::CombiningDisabled)
    ));
    assert!(matches!(
        harness.backup.request_remove(&notes),
        Err(BackupError::CombiningDisabled)
    ));
    assert!(matches!(
        harness.backup.remove_file(&notes),
        Err(BackupError::CombiningDisabled)
    ));
    assert!(harness.prompts.lock().unwrap().is_empty());
    assert_eq!(harness.backup.list_revisions(&notes).unwrap().len(), 1);
}

#[test]
fn test_exclusion_rules() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::with_exclusions(vec![r".*\.log".to_string(), r".*/secret/.*".to_string()]);

    let log = harness.write("x.log", b"log line");
    let secret = harness.write("secret/key.txt", b"k");
    let logical = harness.write("x.logic", b"kept");

    assert!(!harness.backup.on_save(&log).unwrap());
    assert!(!harness.backup.on_save(&secret).unwrap());
    assert!(harness.backup.on_save(&logical).unwrap());

    assert!(harness.backup.list_revisions(&log).unwrap().is_empty());
    assert!(harness.backup.list_revisions(&secret).unwrap().is_empty());
    assert_eq!(harness.backup.tracked_files().unwrap(), vec![logical]);
}

#[test]
fn test_store_files_are_never_backed_up() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);
    let notes = harness.save("notes.txt", b"a");

    let stored = path_map::store_location(harness.backup.store().root(), &notes).unwrap();
    assert!(!harness.backup.on_save(&stored).unwrap());
    assert_eq!(harness.commit_count(), 1);
}

#[test]
fn test_gc_keeps_revision_ids() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let notes = harness.save("notes.txt", b"a");
    harness.save("notes.txt", b"b");
    let before = harness.backup.list_revisions(&notes).unwrap();

    harness.backup.gc();

    let after = harness.backup.list_revisions(&notes).unwrap();
    assert_eq!(before, after);
    assert_eq!(
        harness.backup.fetch_content(&before[1].id, &notes).unwrap(),
        Some(b"a".to_vec())
    );
}

#[test]
fn test_select_action_diff_and_restore() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);

    let notes = harness.save("notes.txt", b"line 1\nline 2\n");
    fs::write(&notes, b"line 1\nline two\n").unwrap();
    let rev = harness.backup.list_candidates(&notes).unwrap()[0].id.clone();

    let selection = harness
        .backup
        .select_action(&rev, &notes, SelectAction::Diff)
        .unwrap()
        .unwrap();
    assert_eq!(selection.content, b"line 1\nline 2\n");
    assert_eq!(selection.current.as_deref(), Some(&b"line 1\nline two\n"[..]));
    assert_eq!(selection.suggested_name, format!("notes.txt [{}]", &rev[..8]));

    let diff = harness
        .backup
        .diff(&rev, &notes, &DiffOptions::default())
        .unwrap()
        .unwrap();
    assert!(diff.has_changes());
    assert_eq!(diff.lines_added, 1);
    assert_eq!(diff.lines_deleted, 1);

    let selection = harness
        .backup
        .select_action(&rev, &notes, SelectAction::ReplaceCurrent)
        .unwrap()
        .unwrap();
    assert!(selection.current.is_none());
    fs::write(&notes, &selection.content).unwrap();
    assert_eq!(fs::read(&notes).unwrap(), b"line 1\nline 2\n");
}

#[test]
fn test_concurrent_backups_of_distinct_files() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let harness = GitHarness::new(CombinePolicy::NeverAsk);
    let paths: Vec<PathBuf> = (0..4)
        .map(|i| harness.write(&format!("file{}.txt", i), format!("v0-{}", i).as_bytes()))
        .collect();

    thread::scope(|scope| {
        for path in &paths {
            let backup = &harness.backup;
            scope.spawn(move || {
                for round in 0..3 {
                    let name = path.file_name().unwrap().to_string_lossy().into_owned();
                    fs::write(path, format!("{}-{}", name, round)).unwrap();
                    assert!(backup.backup(path).unwrap());
                }
            });
        }
    });

    assert_eq!(harness.commit_count(), 12);
    for path in &paths {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let contents = harness.contents(path);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0], format!("{}-2", name).into_bytes());
        assert_eq!(contents[2], format!("{}-0", name).into_bytes());
    }
}

#[cfg(unix)]
#[test]
fn test_hanging_git_times_out() {
    use std::os::unix::fs::PermissionsExt;

    let bin_dir = TempDir::new().unwrap();
    let fake_git = bin_dir.path().join("slow-git");
    fs::write(&fake_git, "#!/bin/sh\nexec sleep 30\n").unwrap();
    fs::set_permissions(&fake_git, fs::Permissions::from_mode(0o755)).unwrap();

    let home = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let backup = GitBackup::builder()
        .store_path(store.path().join("store"))
        .git_binary(&fake_git)
        .command_timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let path = home.path().join("notes.txt");
    fs::write(&path, "a").unwrap();

    let started = std::time::Instant::now();
    let err = backup.backup(&path).unwrap_err();
    assert!(matches!(err, BackupError::CommandTimeout { .. }), "got {:?}", err);
    assert!(err.is_process_error());
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[test]
fn test_missing_git_binary_is_reported() {
    let home = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let backup = GitBackup::builder()
        .store_path(store.path().join("store"))
        .git_binary("/nonexistent/git-binary")
        .build()
        .unwrap();

    let path = home.path().join("notes.txt");
    fs::write(&path, "a").unwrap();

    let err = backup.backup(&path).unwrap_err();
    assert!(matches!(err, BackupError::ProcessSpawn { .. }), "got {:?}", err);
    assert!(err.user_message().contains("git_binary"));
}
