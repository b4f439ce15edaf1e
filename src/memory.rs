//! In-memory [`VersionControl`] for tests and embedding without git
//!
//! `MemoryVcs` keeps commits, the index and configuration per repository path
//! in memory. It reads staged content from the real store working tree, so the
//! file-copy half of a backup is still exercised against the filesystem, and
//! `init` creates a `.git` directory so store initialization checks behave the
//! same as with [`GitCli`](crate::vcs::GitCli).
//!
//! Ids are 40 hex digits, abbreviations resolve like git's, and rewritten
//! commits receive fresh ids while untouched ancestors keep theirs. Commits
//! dropped by a rewrite remain readable until `gc(prune_now = true)`.

use crate::error::{BackupError, Result};
use crate::vcs::{CommandOutput, LogEntry, VersionControl};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone)]
struct MemCommit {
    id: String,
    tree: Tree,
    subject: String,
    owner: String,
    time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemRepo {
    config: BTreeMap<String, String>,
    index: Tree,
    /// Current branch, oldest first
    branch: Vec<MemCommit>,
    /// Every commit ever created and not yet pruned
    objects: HashMap<String, MemCommit>,
}

/// Fake version-control client keeping history in memory
#[derive(Debug, Default)]
pub struct MemoryVcs {
    repos: Mutex<HashMap<PathBuf, MemRepo>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    sequence: Mutex<u64>,
}

impl MemoryVcs {
    /// Create an empty fake
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `operation` (e.g. `"commit"`, `"gc"`) fail
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Names of the operations invoked so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of times `operation` was invoked
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == operation).count()
    }

    /// Number of commits on the current branch of `repo`
    pub fn commit_count(&self, repo: &Path) -> usize {
        self.repos.lock().get(repo).map_or(0, |r| r.branch.len())
    }

    /// Configuration value set on `repo`
    pub fn config_value(&self, repo: &Path, key: &str) -> Option<String> {
        self.repos.lock().get(repo).and_then(|r| r.config.get(key).cloned())
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        self.calls.lock().push(operation.to_string());
        if self.failing.lock().contains(operation) {
            return Err(BackupError::ProcessFailure {
                command: format!("memory {}", operation),
                status: "exit code 1".to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn with_repo<T>(&self, repo: &Path, f: impl FnOnce(&mut MemRepo) -> Result<T>) -> Result<T> {
        let mut repos = self.repos.lock();
        let state = repos.get_mut(repo).ok_or_else(|| BackupError::ProcessFailure {
            command: "memory".to_string(),
            status: "exit code 128".to_string(),
            stderr: format!("not a repository: {}", repo.display()),
        })?;
        f(state)
    }

    fn next_commit(&self, tree: Tree, subject: String, owner: String) -> MemCommit {
        let mut sequence = self.sequence.lock();
        *sequence += 1;
        let n = *sequence;
        let base = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now);
        MemCommit {
            id: format!("{:08x}{:032x}", n, n.wrapping_mul(0x9e37_79b9_7f4a_7c15)),
            tree,
            subject,
            owner,
            time: base + ChronoDuration::seconds(n as i64),
        }
    }
}

impl MemRepo {
    /// Resolve a full or abbreviated id among stored objects
    fn resolve(&self, rev: &str) -> Option<&MemCommit> {
        if rev.len() < 4 {
            return None;
        }
        let mut matches = self.objects.values().filter(|c| c.id.starts_with(rev));
        match (matches.next(), matches.next()) {
            (Some(commit), None) => Some(commit),
            _ => None,
        }
    }

    fn branch_position(&self, id: &str) -> Option<usize> {
        self.branch.iter().position(|c| c.id == id)
    }
}

fn render_label(commit: &MemCommit, format: &str, date_format: &str) -> String {
    format
        .replace("%H", &commit.id)
        .replace("%h", &commit.id[..7])
        .replace("%s", &commit.subject)
        .replace("%cd", &commit.time.format(date_format).to_string())
        .replace("%cI", &commit.time.to_rfc3339())
}

impl VersionControl for MemoryVcs {
    fn run(&self, _repo: &Path, args: &[OsString], _env: &[(&str, &OsStr)]) -> Result<CommandOutput> {
        self.enter("run")?;
        self.calls.lock().push(
            args.iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        );
        Ok(CommandOutput {
            code: Some(0),
            ..Default::default()
        })
    }

    fn init(&self, repo: &Path) -> Result<()> {
        self.enter("init")?;
        fs::create_dir_all(repo.join(".git"))?;
        self.repos.lock().entry(repo.to_path_buf()).or_default();
        Ok(())
    }

    fn set_config(&self, repo: &Path, key: &str, value: &str) -> Result<()> {
        self.enter("set_config")?;
        self.with_repo(repo, |state| {
            state.config.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn get_config(&self, repo: &Path, key: &str) -> Result<Option<String>> {
        self.enter("get_config")?;
        self.with_repo(repo, |state| Ok(state.config.get(key).cloned()))
    }

    fn add(&self, repo: &Path, rel: &str) -> Result<()> {
        self.enter("add")?;
        let content = fs::read(repo.join(rel))?;
        self.with_repo(repo, |state| {
            state.index.insert(rel.to_string(), content);
            Ok(())
        })
    }

    fn commit(&self, repo: &Path, subject: &str, owner: &str) -> Result<()> {
        self.enter("commit")?;
        let tree = self.with_repo(repo, |state| Ok(state.index.clone()))?;
        let commit = self.next_commit(tree, subject.to_string(), owner.to_string());
        self.with_repo(repo, |state| {
            state.objects.insert(commit.id.clone(), commit.clone());
            state.branch.push(commit);
            Ok(())
        })
    }

    fn ls_files(&self, repo: &Path) -> Result<Vec<String>> {
        self.enter("ls_files")?;
        self.with_repo(repo, |state| Ok(state.index.keys().cloned().collect()))
    }

    fn log_labels(&self, repo: &Path, format: &str, date_format: &str) -> Result<Vec<String>> {
        self.enter("log_labels")?;
        self.with_repo(repo, |state| {
            Ok(state
                .branch
                .iter()
                .rev()
                .map(|c| render_label(c, format, date_format))
                .collect())
        })
    }

    fn log_entries(&self, repo: &Path) -> Result<Vec<LogEntry>> {
        self.enter("log_entries")?;
        self.with_repo(repo, |state| {
            Ok(state
                .branch
                .iter()
                .rev()
                .map(|c| LogEntry {
                    id: c.id.clone(),
                    committed_at: Some(c.time),
                    owner: Some(c.owner.clone()),
                })
                .collect())
        })
    }

    fn contains_revision(&self, repo: &Path, rev: &str, rel: &str) -> Result<bool> {
        self.enter("contains_revision")?;
        self.with_repo(repo, |state| {
            let Some(position) = state.resolve(rev).and_then(|c| state.branch_position(&c.id)) else {
                return Ok(false);
            };
            // Same answer as `git log -1 <rev> -- <rel>`: some ancestor changed the path.
            let mut previous: Option<&Vec<u8>> = None;
            for commit in &state.branch[..=position] {
                let current = commit.tree.get(rel);
                if current != previous {
                    return Ok(true);
                }
                previous = current;
            }
            Ok(false)
        })
    }

    fn show(&self, repo: &Path, rev: &str, rel: &str) -> Result<Option<Vec<u8>>> {
        self.enter("show")?;
        self.with_repo(repo, |state| Ok(state.resolve(rev).and_then(|c| c.tree.get(rel).cloned())))
    }

    fn filter_branch(&self, repo: &Path, rel: &str) -> Result<()> {
        self.enter("filter_branch")?;
        let old_branch = self.with_repo(repo, |state| Ok(std::mem::take(&mut state.branch)))?;

        let mut rewritten = Vec::with_capacity(old_branch.len());
        let mut diverged = false;
        for commit in old_branch {
            if commit.owner == rel {
                diverged = true;
                continue;
            }
            if !diverged && !commit.tree.contains_key(rel) {
                rewritten.push(commit);
                continue;
            }
            diverged = true;
            let mut tree = commit.tree.clone();
            tree.remove(rel);
            let mut fresh = self.next_commit(tree, commit.subject.clone(), commit.owner.clone());
            fresh.time = commit.time;
            rewritten.push(fresh);
        }

        self.with_repo(repo, |state| {
            for commit in &rewritten {
                state.objects.insert(commit.id.clone(), commit.clone());
            }
            state.index = rewritten.last().map(|c| c.tree.clone()).unwrap_or_default();
            state.branch = rewritten;
            Ok(())
        })
    }

    fn drop_history(&self, repo: &Path) -> Result<()> {
        self.enter("drop_history")?;
        self.with_repo(repo, |state| {
            state.branch.clear();
            Ok(())
        })
    }

    fn remove_from_index(&self, repo: &Path, rel: &str) -> Result<()> {
        self.enter("remove_from_index")?;
        self.with_repo(repo, |state| {
            state.index.remove(rel);
            Ok(())
        })
    }

    fn expire_rewritten(&self, repo: &Path) -> Result<()> {
        self.enter("expire_rewritten")?;
        self.with_repo(repo, |_| Ok(()))
    }

    fn gc(&self, repo: &Path, prune_now: bool) -> Result<()> {
        self.enter("gc")?;
        self.with_repo(repo, |state| {
            if prune_now {
                let live: HashSet<String> = state.branch.iter().map(|c| c.id.clone()).collect();
                state.objects.retain(|id, _| live.contains(id));
            }
            Ok(())
        })
    }
}
