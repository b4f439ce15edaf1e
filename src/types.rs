//! Core data types used throughout the git-backup library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **History**: [`Revision`] - one backed-up snapshot of a file as shown in a picker
//! - **Picker actions**: [`SelectAction`], [`Selection`] - what the caller does with a revision
//! - **Rewrite policy**: [`CombinePolicy`], [`CombineOutcome`], [`RemoveOutcome`]
//! - **Diffs**: [`DiffOptions`], [`DiffHunk`], [`LineChange`], [`RevisionDiff`]
//! - **Callbacks**: [`ConfirmCallback`] - the yes/no prompt capability
//!
//! ## Examples
//!
//! ```rust
//! use git_backup::types::{CombinePolicy, SelectAction};
//!
//! let policy: CombinePolicy = "never_ask".parse().unwrap();
//! assert_eq!(policy, CombinePolicy::NeverAsk);
//! assert!(SelectAction::Diff.needs_current_content());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// One backed-up snapshot of a file
///
/// Revisions are listed newest first, in git's native log order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Full commit id in the backup store
    pub id: String,
    /// Human-readable label rendered from the configured log format
    pub label: String,
    /// Commit timestamp, when git reported a parseable one
    pub committed_at: Option<DateTime<Utc>>,
}

impl Revision {
    /// Get the abbreviated id (first 8 characters)
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Abbreviate a revision id to its first 8 characters
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// What the caller intends to do with a selected revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectAction {
    /// Open the revision content in a new buffer
    OpenNew,
    /// Replace the current file content with the revision content
    ReplaceCurrent,
    /// Compare the revision content with the current file content
    Diff,
}

impl SelectAction {
    /// Whether the caller also needs the file's current content
    pub fn needs_current_content(&self) -> bool {
        matches!(self, SelectAction::Diff)
    }
}

/// Content handed back for a selected revision
///
/// Rendering (new buffer, in-place replace, diff view) is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Action the caller asked for
    pub action: SelectAction,
    /// Revision the content was taken from
    pub revision_id: String,
    /// Real file the revision belongs to
    pub path: PathBuf,
    /// Exact bytes of the file at that revision
    pub content: Vec<u8>,
    /// Current bytes on disk, filled in for [`SelectAction::Diff`]
    pub current: Option<Vec<u8>>,
    /// Suggested name for a buffer showing the revision
    pub suggested_name: String,
}

/// Policy gating destructive history rewrites
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinePolicy {
    /// Ask for confirmation before every remove/combine
    #[default]
    AlwaysAsk,
    /// Proceed without asking
    NeverAsk,
    /// Refuse remove/combine outright
    Disabled,
}

impl CombinePolicy {
    /// Whether rewrites are allowed at all
    pub fn allows_rewrite(&self) -> bool {
        !matches!(self, CombinePolicy::Disabled)
    }
}

impl fmt::Display for CombinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CombinePolicy::AlwaysAsk => "always_ask",
            CombinePolicy::NeverAsk => "never_ask",
            CombinePolicy::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

impl FromStr for CombinePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "always_ask" | "ask" => Ok(CombinePolicy::AlwaysAsk),
            "never_ask" | "never" => Ok(CombinePolicy::NeverAsk),
            "disabled" | "off" => Ok(CombinePolicy::Disabled),
            other => Err(format!("unknown combine policy '{}'", other)),
        }
    }
}

/// Result of a combine request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOutcome {
    /// Confirmation was not given; nothing changed
    Declined,
    /// History was collapsed into one fresh revision
    Combined,
    /// History was removed but the file could not be backed up again
    /// (missing or excluded)
    RemovedOnly,
}

/// Result of a remove request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Confirmation was not given; nothing changed
    Declined,
    /// The file had no revisions
    NothingToRemove,
    /// All revisions of the file were removed
    Removed,
}

/// Yes/no prompt capability used when the policy is [`CombinePolicy::AlwaysAsk`]
pub type ConfirmCallback = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Options for line-level diffs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Unchanged lines shown around each change
    pub context_lines: usize,
    /// Compare lines with surrounding whitespace trimmed
    pub ignore_whitespace: bool,
    /// Inputs larger than this are reported as too large instead of diffed
    pub max_file_size: u64,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            ignore_whitespace: false,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

/// One line in a diff hunk; numbers are 1-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineChange {
    /// Line present only in the new content
    Added(usize, String),
    /// Line present only in the old content
    Deleted(usize, String),
    /// Unchanged line
    Context(usize, String),
}

/// A contiguous group of changes with context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    /// First old line covered (1-based)
    pub from_line: usize,
    /// Old lines covered
    pub from_count: usize,
    /// First new line covered (1-based)
    pub to_line: usize,
    /// New lines covered
    pub to_count: usize,
    /// Lines in order
    pub changes: Vec<LineChange>,
}

/// Difference between a revision and the current content of its file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionDiff {
    /// Real file path
    pub path: PathBuf,
    /// Revision the old side was taken from
    pub revision_id: String,
    /// Either side looks binary; no hunks computed
    pub is_binary: bool,
    /// Either side exceeds [`DiffOptions::max_file_size`]; no hunks computed
    pub too_large: bool,
    /// Hunks, old = revision, new = current
    pub hunks: Vec<DiffHunk>,
    /// Lines added since the revision
    pub lines_added: usize,
    /// Lines deleted since the revision
    pub lines_deleted: usize,
}

impl RevisionDiff {
    /// Whether the revision and the current content differ line-wise
    pub fn has_changes(&self) -> bool {
        self.lines_added > 0 || self.lines_deleted > 0
    }
}
