//! Version-control client used as the backup store's persistence layer
//!
//! Every interaction with the store's repository goes through the
//! [`VersionControl`] trait. [`GitCli`] implements it by spawning the git
//! binary with structured argument lists; [`MemoryVcs`](crate::memory::MemoryVcs)
//! implements it in memory so the engine can be tested without processes.
//!
//! ## Ownership trailer
//!
//! Each backup commit has the subject `backup` and a `Backup-Path:` trailer
//! naming the store-relative file it belongs to, quoted by
//! [`path_map::quote_trailer`] when git would otherwise trim it. History
//! listing and history rewriting both key on that trailer, so a backup of
//! unchanged content (an empty commit) still counts as a revision of its file.
//!
//! ## Timeouts
//!
//! [`GitCli`] kills any invocation that runs longer than its configured
//! timeout and reports [`BackupError::CommandTimeout`].

use crate::error::{BackupError, Result};
use crate::path_map;
use chrono::{DateTime, Utc};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Trailer key binding a commit to the file it backs up
pub const OWNER_TRAILER: &str = "Backup-Path";

/// Interval between child status polls
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Removes the file named by `GIT_BACKUP_PATH` from every rewritten tree
const INDEX_FILTER: &str = r#"git rm -q --cached --ignore-unmatch -- "$GIT_BACKUP_PATH""#;

/// Drops every commit whose ownership trailer is `GIT_BACKUP_TRAILER`
const COMMIT_FILTER: &str = r#"msg=$(cat)
if printf '%s\n' "$msg" | grep -qxF "Backup-Path: $GIT_BACKUP_TRAILER"; then
    skip_commit "$@"
else
    printf '%s\n' "$msg" | git commit-tree "$@"
fi"#;

/// Captured result of one version-control invocation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    /// Raw standard output
    pub stdout: Vec<u8>,
    /// Raw standard error
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Standard output as text, optionally without one trailing newline
    pub fn stdout_text(&self, strip_trailing_newline: bool) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if strip_trailing_newline && text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        text
    }

    /// Standard error as trimmed text
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    fn from_status(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            code: status.code(),
            stdout,
            stderr,
        }
    }
}

/// One commit of the store history as seen by the history reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Full commit id
    pub id: String,
    /// Committer timestamp
    pub committed_at: Option<DateTime<Utc>>,
    /// Store-relative path from the ownership trailer
    pub owner: Option<String>,
}

/// Capability the store uses to talk to its repository
///
/// All paths passed as `rel` are store-relative and `/`-separated; `repo` is
/// the store root. Implementations must be usable from several threads; the
/// engine serializes mutations itself.
pub trait VersionControl: Send + Sync + fmt::Debug {
    /// Run an arbitrary command with `repo` as working directory
    ///
    /// A non-zero exit status is not an error here; inspect
    /// [`CommandOutput::success`].
    fn run(&self, repo: &Path, args: &[OsString], env: &[(&str, &OsStr)]) -> Result<CommandOutput>;

    /// Create an empty repository in `repo`
    fn init(&self, repo: &Path) -> Result<()>;

    /// Set a repository-local configuration value
    fn set_config(&self, repo: &Path, key: &str, value: &str) -> Result<()>;

    /// Repository-local configuration value, `None` if unset
    fn get_config(&self, repo: &Path, key: &str) -> Result<Option<String>>;

    /// Stage the current content of `rel`
    fn add(&self, repo: &Path, rel: &str) -> Result<()>;

    /// Commit the index with `subject` and the ownership trailer for `owner`
    ///
    /// Must create a commit even when nothing changed.
    fn commit(&self, repo: &Path, subject: &str, owner: &str) -> Result<()>;

    /// Every path currently in the index
    fn ls_files(&self, repo: &Path) -> Result<Vec<String>>;

    /// Whether `rel` is currently in the index
    fn is_tracked(&self, repo: &Path, rel: &str) -> Result<bool> {
        Ok(self.ls_files(repo)?.iter().any(|path| path == rel))
    }

    /// Labels for every commit reachable from `HEAD`, newest first
    fn log_labels(&self, repo: &Path, format: &str, date_format: &str) -> Result<Vec<String>>;

    /// Ids, timestamps and owners for every commit reachable from `HEAD`,
    /// in the same order as [`VersionControl::log_labels`]
    fn log_entries(&self, repo: &Path) -> Result<Vec<LogEntry>>;

    /// Whether `rev` is a live commit reachable from `HEAD` with a log entry
    /// for `rel`
    fn contains_revision(&self, repo: &Path, rev: &str, rel: &str) -> Result<bool>;

    /// Exact bytes of `rel` at `rev`, `None` if it is not there
    fn show(&self, repo: &Path, rev: &str, rel: &str) -> Result<Option<Vec<u8>>>;

    /// Rewrite all refs so no tree contains `rel` and no commit owned by
    /// `rel` remains
    fn filter_branch(&self, repo: &Path, rel: &str) -> Result<()>;

    /// Delete the current branch outright; used when every commit belongs
    /// to a single file
    fn drop_history(&self, repo: &Path) -> Result<()>;

    /// Remove `rel` from the index only
    fn remove_from_index(&self, repo: &Path, rel: &str) -> Result<()>;

    /// Forget backup refs and reflogs left behind by a rewrite
    fn expire_rewritten(&self, repo: &Path) -> Result<()>;

    /// Compact the repository; `prune_now` also drops unreachable objects
    fn gc(&self, repo: &Path, prune_now: bool) -> Result<()>;
}

/// [`VersionControl`] backed by the git command-line binary
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
    timeout: Duration,
}

impl GitCli {
    /// Create a client for `binary` with a per-invocation `timeout`
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// The git executable in use
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// The per-invocation timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command_line(&self, args: &[OsString]) -> String {
        let mut line = self.binary.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Run and require a zero exit status
    fn run_checked(&self, repo: &Path, args: &[OsString], env: &[(&str, &OsStr)]) -> Result<CommandOutput> {
        let output = self.run(repo, args, env)?;
        if output.success() {
            Ok(output)
        } else {
            Err(self.failure(args, &output))
        }
    }

    fn failure(&self, args: &[OsString], output: &CommandOutput) -> BackupError {
        BackupError::ProcessFailure {
            command: self.command_line(args),
            status: output
                .code
                .map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {}", c)),
            stderr: output.stderr_text(),
        }
    }

    fn git(&self, repo: &Path, args: &[&str]) -> Result<CommandOutput> {
        self.run_checked(repo, &to_args(args), &[])
    }

    fn has_commits(&self, repo: &Path) -> Result<bool> {
        let output = self.run(repo, &to_args(&["rev-parse", "--verify", "-q", "HEAD"]), &[])?;
        Ok(output.success())
    }
}

impl VersionControl for GitCli {
    fn run(&self, repo: &Path, args: &[OsString], env: &[(&str, &OsStr)]) -> Result<CommandOutput> {
        let command = self.command_line(args);
        debug!("Running `{}` in {:?}", command, repo);

        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(repo)
            .env("GIT_LITERAL_PATHSPECS", "1")
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(env.iter().map(|(k, v)| (*k, *v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BackupError::ProcessSpawn {
                program: self.binary.clone(),
                source,
            })?;

        // Drain both pipes on helper threads so a chatty child never blocks
        // on a full pipe while we wait for it.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BackupError::CommandTimeout {
                    command,
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;
        let output = CommandOutput::from_status(status, stdout, stderr);
        trace!("`{}` exited with {:?}", command, output.code);
        Ok(output)
    }

    fn init(&self, repo: &Path) -> Result<()> {
        self.git(repo, &["init", "-q"])?;
        Ok(())
    }

    fn set_config(&self, repo: &Path, key: &str, value: &str) -> Result<()> {
        self.git(repo, &["config", key, value])?;
        Ok(())
    }

    fn get_config(&self, repo: &Path, key: &str) -> Result<Option<String>> {
        let args = to_args(&["config", "--local", "--get", key]);
        let output = self.run(repo, &args, &[])?;
        match output.code {
            Some(0) => Ok(Some(output.stdout_text(true))),
            // Exit status 1 means the key is not set.
            Some(1) => Ok(None),
            _ => Err(self.failure(&args, &output)),
        }
    }

    fn add(&self, repo: &Path, rel: &str) -> Result<()> {
        self.git(repo, &["add", "-f", "--", rel])?;
        Ok(())
    }

    fn commit(&self, repo: &Path, subject: &str, owner: &str) -> Result<()> {
        let trailer = format!("{}: {}", OWNER_TRAILER, path_map::quote_trailer(owner));
        self.git(
            repo,
            &["commit", "-q", "--allow-empty", "--no-verify", "-m", subject, "-m", &trailer],
        )?;
        Ok(())
    }

    fn ls_files(&self, repo: &Path) -> Result<Vec<String>> {
        let output = self.git(repo, &["ls-files", "-z"])?;
        Ok(split_nul(&output.stdout))
    }

    fn is_tracked(&self, repo: &Path, rel: &str) -> Result<bool> {
        let output = self.git(repo, &["ls-files", "-z", "--", rel])?;
        Ok(split_nul(&output.stdout).iter().any(|path| path == rel))
    }

    fn log_labels(&self, repo: &Path, format: &str, date_format: &str) -> Result<Vec<String>> {
        if !self.has_commits(repo)? {
            return Ok(Vec::new());
        }
        let format = format!("--format={}%x00", format);
        let date = format!("--date=format:{}", date_format);
        let output = self.git(repo, &["log", "--no-show-signature", &date, &format])?;
        Ok(split_records(&output.stdout))
    }

    fn log_entries(&self, repo: &Path) -> Result<Vec<LogEntry>> {
        if !self.has_commits(repo)? {
            return Ok(Vec::new());
        }
        let format = format!("--format=%H%x09%cI%x09%(trailers:key={},valueonly)%x00", OWNER_TRAILER);
        let output = self.git(repo, &["log", "--no-show-signature", &format])?;
        Ok(split_records(&output.stdout)
            .iter()
            .map(|record| parse_log_entry(record))
            .collect())
    }

    fn contains_revision(&self, repo: &Path, rev: &str, rel: &str) -> Result<bool> {
        let commit = format!("{}^{{commit}}", rev);
        if !self.run(repo, &to_args(&["rev-parse", "--verify", "-q", &commit]), &[])?.success() {
            return Ok(false);
        }
        if !self
            .run(repo, &to_args(&["merge-base", "--is-ancestor", rev, "HEAD"]), &[])?
            .success()
        {
            return Ok(false);
        }
        let output = self.run(repo, &to_args(&["log", "-1", "--format=%H", rev, "--", rel]), &[])?;
        Ok(output.success() && !output.stdout_text(true).is_empty())
    }

    fn show(&self, repo: &Path, rev: &str, rel: &str) -> Result<Option<Vec<u8>>> {
        let object = format!("{}:{}", rev, rel);
        let output = self.run(repo, &to_args(&["cat-file", "blob", &object]), &[])?;
        Ok(output.success().then_some(output.stdout))
    }

    fn filter_branch(&self, repo: &Path, rel: &str) -> Result<()> {
        let args = to_args(&[
            "filter-branch",
            "-f",
            "--index-filter",
            INDEX_FILTER,
            "--commit-filter",
            COMMIT_FILTER,
            "--",
            "--all",
        ]);
        let trailer = path_map::quote_trailer(rel);
        let env = [
            ("GIT_BACKUP_PATH", OsStr::new(rel)),
            ("GIT_BACKUP_TRAILER", OsStr::new(&trailer)),
            ("FILTER_BRANCH_SQUELCH_WARNING", OsStr::new("1")),
        ];
        self.run_checked(repo, &args, &env)?;
        Ok(())
    }

    fn drop_history(&self, repo: &Path) -> Result<()> {
        self.git(repo, &["update-ref", "-d", "HEAD"])?;
        Ok(())
    }

    fn remove_from_index(&self, repo: &Path, rel: &str) -> Result<()> {
        self.git(repo, &["update-index", "--force-remove", "--", rel])?;
        Ok(())
    }

    fn expire_rewritten(&self, repo: &Path) -> Result<()> {
        let refs = self.git(repo, &["for-each-ref", "--format=%(refname)", "refs/original/"])?;
        for refname in refs.stdout_text(true).lines().filter(|l| !l.is_empty()) {
            self.git(repo, &["update-ref", "-d", refname])?;
        }
        self.git(repo, &["reflog", "expire", "--expire=now", "--all"])?;
        Ok(())
    }

    fn gc(&self, repo: &Path, prune_now: bool) -> Result<()> {
        if prune_now {
            self.git(repo, &["gc", "--quiet", "--prune=now"])?;
        } else {
            self.git(repo, &["gc", "--quiet"])?;
        }
        Ok(())
    }
}

fn to_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<thread::JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| BackupError::internal("pipe reader thread panicked"))?
            .map_err(BackupError::from),
        None => Ok(Vec::new()),
    }
}

fn split_nul(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Split `--format=...%x00` output; each record ends with NUL plus git's newline
fn split_records(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split_terminator("\0\n")
        .map(str::to_string)
        .collect()
}

fn parse_log_entry(record: &str) -> LogEntry {
    let mut fields = record.splitn(3, '\t');
    let id = fields.next().unwrap_or_default().trim().to_string();
    let committed_at = fields
        .next()
        .and_then(|date| DateTime::parse_from_rfc3339(date.trim()).ok())
        .map(|date| date.with_timezone(&Utc));
    let owner = fields
        .next()
        .and_then(|trailers| trailers.lines().next())
        .map(path_map::unquote_trailer)
        .filter(|owner| !owner.is_empty());
    LogEntry {
        id,
        committed_at,
        owner,
    }
}
