//! Main GitBackup implementation
//!
//! This module provides [`GitBackup`], the entry point the surrounding editor
//! or tool talks to, and [`GitBackupBuilder`] for constructing one.
//!
//! ## Overview
//!
//! `GitBackup` wires the components together around one shared [`Store`]:
//!
//! - **Version Writer**: copies and commits a file on every save
//! - **History Reader**: lists revisions and serves their content
//! - **History Rewriter**: removes or collapses a file's history
//!
//! The collaborator-facing methods (`on_save`, `list_candidates`,
//! `select_action`, `request_remove`, `request_combine`) keep interactive
//! ergonomics: relative paths are a no-op there, while the core methods
//! (`backup`, `list_revisions`, `fetch_content`, `remove_file`, `combine`)
//! report them as [`BackupError::NotAbsolutePath`].
//!
//! ## Thread Safety
//!
//! `GitBackup` is `Send + Sync`. Share it through an `Arc`; mutations are
//! serialized on the store lock, reads run concurrently with each other.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use git_backup::{GitBackup, SelectAction};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backup = GitBackup::builder()
//!     .store_path("/tmp/store")
//!     .exclusion_rules(vec![".*\\.gpg".to_string()])
//!     .build()?;
//!
//! let file = Path::new("/home/u/notes.txt");
//! backup.on_save(file)?;
//!
//! for revision in backup.list_candidates(file)? {
//!     println!("{}  {}", revision.short_id(), revision.label);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::BackupConfig;
use crate::diff;
use crate::error::{BackupError, Result};
use crate::exclusion::ExclusionFilter;
use crate::history::HistoryReader;
use crate::rewrite::HistoryRewriter;
use crate::store::Store;
use crate::types::*;
use crate::vcs::{GitCli, VersionControl};
use crate::writer::VersionWriter;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Per-file backup engine over a shadow git store
pub struct GitBackup {
    config: BackupConfig,
    store: Arc<Store>,
    writer: VersionWriter,
    reader: HistoryReader,
    rewriter: HistoryRewriter,
    confirm: Option<ConfirmCallback>,
}

impl fmt::Debug for GitBackup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitBackup")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("confirm", &self.confirm.is_some())
            .finish()
    }
}

impl GitBackup {
    /// Start building an engine with default configuration
    pub fn builder() -> GitBackupBuilder {
        GitBackupBuilder::new()
    }

    /// Create an engine from `config` using the git binary it names
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidConfiguration`] if `config` fails validation
    /// - [`BackupError::InvalidPattern`] if an exclusion rule does not compile
    pub fn new(config: BackupConfig) -> Result<Self> {
        GitBackupBuilder::from_config(config).build()
    }

    /// Configuration in effect
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Underlying store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Whether the store has been created yet
    pub fn is_initialized(&self) -> bool {
        self.store.is_initialized()
    }

    // ----- core operations -------------------------------------------------

    /// Back up the current content of `abs`
    ///
    /// Returns `false` if there was nothing to do (empty path, missing file,
    /// excluded path).
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotAbsolutePath`] for a relative path
    /// - [`BackupError::Io`] or process errors while copying and committing
    #[instrument(skip(self))]
    pub fn backup(&self, abs: &Path) -> Result<bool> {
        self.writer.backup(abs)
    }

    /// Revisions of `abs`, newest first
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotAbsolutePath`] for a relative or empty path
    /// - [`BackupError::LogMismatch`] and process errors from the log queries
    #[instrument(skip(self))]
    pub fn list_revisions(&self, abs: &Path) -> Result<Vec<Revision>> {
        self.reader.list_revisions(abs)
    }

    /// Exact bytes of `abs` at `rev`, `None` for stale or unknown revisions
    #[instrument(skip(self))]
    pub fn fetch_content(&self, rev: &str, abs: &Path) -> Result<Option<Vec<u8>>> {
        self.reader.fetch_content(rev, abs)
    }

    /// Remove every revision of `abs`, without asking
    ///
    /// Previously fetched revision ids of this file become invalid.
    ///
    /// # Errors
    ///
    /// - [`BackupError::CombiningDisabled`] if the policy forbids rewrites
    /// - [`BackupError::NotAbsolutePath`] and process errors
    #[instrument(skip(self))]
    pub fn remove_file(&self, abs: &Path) -> Result<RemoveOutcome> {
        self.rewriter.remove_file(abs)
    }

    /// Collapse the history of `abs` into one revision of its current content
    ///
    /// `confirmed` must be `true` when the policy is
    /// [`CombinePolicy::AlwaysAsk`], otherwise nothing happens.
    ///
    /// # Errors
    ///
    /// - [`BackupError::CombiningDisabled`] if the policy forbids rewrites
    /// - [`BackupError::NotAbsolutePath`] and process errors
    #[instrument(skip(self))]
    pub fn combine(&self, abs: &Path, confirmed: bool) -> Result<CombineOutcome> {
        self.rewriter.combine(abs, confirmed)
    }

    /// Compact the store; best-effort
    #[instrument(skip(self))]
    pub fn gc(&self) {
        self.store.gc();
    }

    /// Every file with a snapshot in the store
    pub fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        self.store.tracked_files()
    }

    /// Diff revision `rev` of `abs` against the file's current content
    ///
    /// A file deleted since the revision diffs against empty content.
    /// Returns `None` for stale or unknown revisions.
    pub fn diff(&self, rev: &str, abs: &Path, options: &DiffOptions) -> Result<Option<RevisionDiff>> {
        let Some(old) = self.fetch_content(rev, abs)? else {
            return Ok(None);
        };
        let current = read_current(abs)?;
        Ok(Some(diff::diff_revision(abs, rev, &old, &current, options)))
    }

    // ----- collaborator interface -----------------------------------------

    /// Save hook: back up `abs`, treating a relative path as a no-op
    pub fn on_save(&self, abs: &Path) -> Result<bool> {
        match self.backup(abs) {
            Err(BackupError::NotAbsolutePath(path)) => {
                debug!("Ignoring save of relative path {:?}", path);
                Ok(false)
            }
            other => other,
        }
    }

    /// Picker source: revisions of `abs`, empty for a relative path
    pub fn list_candidates(&self, abs: &Path) -> Result<Vec<Revision>> {
        match self.list_revisions(abs) {
            Err(BackupError::NotAbsolutePath(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Picker action: hand back revision content for the caller to render
    ///
    /// `None` when the revision is stale or the path is not absolute.
    pub fn select_action(&self, rev: &str, abs: &Path, action: SelectAction) -> Result<Option<Selection>> {
        let content = match self.fetch_content(rev, abs) {
            Ok(Some(content)) => content,
            Ok(None) | Err(BackupError::NotAbsolutePath(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let current = if action.needs_current_content() {
            Some(read_current(abs)?)
        } else {
            None
        };

        Ok(Some(Selection {
            action,
            revision_id: rev.to_string(),
            path: abs.to_path_buf(),
            content,
            current,
            suggested_name: suggested_name(abs, rev),
        }))
    }

    /// Picker action: remove all revisions of `abs` after confirmation
    ///
    /// # Errors
    ///
    /// - [`BackupError::CombiningDisabled`] if the policy forbids rewrites
    /// - [`BackupError::NotAbsolutePath`] and process errors
    pub fn request_remove(&self, abs: &Path) -> Result<RemoveOutcome> {
        self.ensure_rewrites_allowed()?;
        let count = self.list_revisions(abs)?.len();
        if count == 0 {
            return Ok(RemoveOutcome::NothingToRemove);
        }
        let prompt = format!("Remove all {} backups of {}?", count, abs.display());
        if !self.confirmed(&prompt) {
            info!("Removal of {:?} declined", abs);
            return Ok(RemoveOutcome::Declined);
        }
        self.remove_file(abs)
    }

    /// Picker action: collapse the history of `abs` after confirmation
    ///
    /// # Errors
    ///
    /// - [`BackupError::CombiningDisabled`] if the policy forbids rewrites
    /// - [`BackupError::NotAbsolutePath`] and process errors
    pub fn request_combine(&self, abs: &Path) -> Result<CombineOutcome> {
        self.ensure_rewrites_allowed()?;
        let count = self.list_revisions(abs)?.len();
        let prompt = format!("Combine all {} backups of {} into one?", count, abs.display());
        let confirmed = self.confirmed(&prompt);
        self.combine(abs, confirmed)
    }

    fn ensure_rewrites_allowed(&self) -> Result<()> {
        if self.config.combine_policy.allows_rewrite() {
            Ok(())
        } else {
            Err(BackupError::CombiningDisabled)
        }
    }

    /// Ask only when the policy says so; no callback means no
    fn confirmed(&self, prompt: &str) -> bool {
        match self.config.combine_policy {
            CombinePolicy::AlwaysAsk => self.confirm.as_ref().is_some_and(|ask| ask(prompt)),
            CombinePolicy::NeverAsk => true,
            CombinePolicy::Disabled => false,
        }
    }
}

fn read_current(abs: &Path) -> Result<Vec<u8>> {
    match fs::read(abs) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Buffer name for a revision: `<file name> [<short id>]`
fn suggested_name(abs: &Path, rev: &str) -> String {
    let name = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| abs.display().to_string());
    format!("{} [{}]", name, short_id(rev))
}

/// Builder for configuring a [`GitBackup`]
///
/// # Examples
///
/// ```rust
/// use git_backup::{CombinePolicy, GitBackupBuilder};
/// use std::time::Duration;
///
/// let builder = GitBackupBuilder::new()
///     .store_path("/var/tmp/backups")
///     .combine_policy(CombinePolicy::NeverAsk)
///     .command_timeout(Duration::from_secs(30));
/// ```
pub struct GitBackupBuilder {
    config: BackupConfig,
    vcs: Option<Arc<dyn VersionControl>>,
    confirm: Option<ConfirmCallback>,
}

impl GitBackupBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self::from_config(BackupConfig::default())
    }

    /// Start from an existing configuration
    pub fn from_config(config: BackupConfig) -> Self {
        Self {
            config,
            vcs: None,
            confirm: None,
        }
    }

    /// Set the store root
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = path.into();
        self
    }

    /// Set the git executable
    pub fn git_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.config.git_binary = binary.into();
        self
    }

    /// Set the `git log --format` string used for revision labels
    pub fn log_format(mut self, format: impl Into<String>) -> Self {
        self.config.log_format = format.into();
        self
    }

    /// Set the date format used for `%cd` in labels
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.config.date_format = format.into();
        self
    }

    /// Replace the exclusion rules
    ///
    /// Each rule is a regular expression matched against the whole absolute
    /// path.
    pub fn exclusion_rules(mut self, rules: Vec<String>) -> Self {
        self.config.exclusion_rules = rules;
        self
    }

    /// Append one exclusion rule
    pub fn exclude(mut self, rule: impl Into<String>) -> Self {
        self.config.exclusion_rules.push(rule.into());
        self
    }

    /// Set the policy for remove/combine
    pub fn combine_policy(mut self, policy: CombinePolicy) -> Self {
        self.config.combine_policy = policy;
        self
    }

    /// Set the timeout applied to every git invocation
    ///
    /// Rounded up to whole seconds; at least one second.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.set_command_timeout(timeout);
        self
    }

    /// Use `vcs` instead of spawning the configured git binary
    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    /// Set the yes/no prompt used when the policy is [`CombinePolicy::AlwaysAsk`]
    pub fn confirm_with<F>(mut self, confirm: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.confirm = Some(Arc::new(confirm));
        self
    }

    /// Validate the configuration and build the engine
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidConfiguration`] if validation fails
    /// - [`BackupError::InvalidPattern`] if an exclusion rule does not compile
    pub fn build(self) -> Result<GitBackup> {
        self.config.validate()?;
        let filter = ExclusionFilter::new(&self.config.exclusion_rules)?;

        let vcs: Arc<dyn VersionControl> = match self.vcs {
            Some(vcs) => vcs,
            None => Arc::new(GitCli::new(self.config.git_binary.clone(), self.config.command_timeout())),
        };
        let store = Arc::new(Store::new(self.config.store_path.clone(), vcs));
        let writer = VersionWriter::new(store.clone(), filter);
        let reader = HistoryReader::new(store.clone(), &self.config.log_format, &self.config.date_format);
        let rewriter = HistoryRewriter::new(store.clone(), writer.clone(), self.config.combine_policy);

        debug!("Built backup engine for store {:?}", store.root());
        Ok(GitBackup {
            config: self.config,
            store,
            writer,
            reader,
            rewriter,
            confirm: self.confirm,
        })
    }
}

impl Default for GitBackupBuilder {
    fn default() -> Self {
        Self::new()
    }
}
