//! # git-backup - Per-file save history in a shadow git repository
//!
//! Every time a file is saved, its bytes are copied into a hidden git
//! repository (the *store*) that mirrors the real filesystem, and committed as
//! a new revision. The history of any single file can then be listed, read
//! back, diffed, pruned or collapsed.
//!
//! ## Overview
//!
//! The engine is a thin, synchronous orchestration layer over git:
//!
//! - **Path mapping**: `/home/u/notes.txt` lives at `<store>/home/u/notes.txt`
//! - **Exclusion**: regular expressions matched against the whole absolute path
//! - **Store management**: lazy creation with a fixed committer identity, gc
//! - **Version writing**: copy, stage and commit; one revision per call
//! - **History reading**: labelled revision lists and exact content lookup
//! - **History rewriting**: remove or combine all revisions of one file
//!
//! git is reached through the [`VersionControl`] trait, so the engine can run
//! against [`GitCli`] (the real binary, with a per-call timeout) or
//! [`MemoryVcs`] (in memory, for tests).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use git_backup::{CombinePolicy, GitBackup, SelectAction};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backup = GitBackup::builder()
//!     .store_path("/home/u/.git-backup")
//!     .combine_policy(CombinePolicy::AlwaysAsk)
//!     .confirm_with(|prompt| {
//!         println!("{} (answering yes)", prompt);
//!         true
//!     })
//!     .build()?;
//!
//! let file = Path::new("/home/u/notes.txt");
//! backup.on_save(file)?;
//!
//! let revisions = backup.list_candidates(file)?;
//! if let Some(oldest) = revisions.last() {
//!     if let Some(selection) = backup.select_action(&oldest.id, file, SelectAction::OpenNew)? {
//!         println!("{}: {} bytes", selection.suggested_name, selection.content.len());
//!     }
//! }
//!
//! backup.request_combine(file)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Revision ids
//!
//! Ids are git commit ids. They stay valid across [`GitBackup::gc`]. Removing
//! or combining a file invalidates every id of that file, and rewrites the
//! ids of all commits made after its first backup; stale ids are answered
//! with `None`, never with another file's content.
//!
//! ## Module Organization
//!
//! - [`git_backup`]: the engine and its builder
//! - [`config`]: serializable configuration
//! - [`path_map`], [`exclusion`]: pure path logic
//! - [`store`], [`writer`], [`history`], [`rewrite`]: the components
//! - [`vcs`], [`memory`]: version-control clients
//! - [`diff`]: line diffs between a revision and the current file
//! - [`types`], [`error`]: shared types

pub mod config;
pub mod diff;
pub mod error;
pub mod exclusion;
pub mod git_backup;
pub mod history;
pub mod memory;
pub mod path_map;
pub mod rewrite;
pub mod store;
pub mod types;
pub mod utils;
pub mod vcs;
pub mod writer;

pub use config::BackupConfig;
pub use error::{BackupError, Result};
pub use exclusion::ExclusionFilter;
pub use git_backup::{GitBackup, GitBackupBuilder};
pub use memory::MemoryVcs;
pub use store::Store;
pub use types::*;
pub use vcs::{CommandOutput, GitCli, LogEntry, VersionControl};
