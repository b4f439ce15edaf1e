//! The single write path into the store
//!
//! A backup copies the file's current bytes to its mapped location in the
//! store, stages that path and commits it. Every commit carries the ownership
//! trailer and is created even when nothing changed, so each successful call
//! adds exactly one revision.

use crate::error::{BackupError, Result};
use crate::exclusion::ExclusionFilter;
use crate::path_map;
use crate::store::Store;
use crate::utils;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Subject line of every backup commit
pub const COMMIT_SUBJECT: &str = "backup";

/// Copies files into the store and commits them
#[derive(Debug, Clone)]
pub struct VersionWriter {
    store: Arc<Store>,
    filter: ExclusionFilter,
}

impl VersionWriter {
    /// Create a writer for `store` honoring `filter`
    pub fn new(store: Arc<Store>, filter: ExclusionFilter) -> Self {
        Self { store, filter }
    }

    /// Exclusion rules in effect
    pub fn filter(&self) -> &ExclusionFilter {
        &self.filter
    }

    /// Back up the current content of `abs`
    ///
    /// Returns `false` without touching the store if `abs` is empty, missing,
    /// not a regular file or excluded.
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotAbsolutePath`] for a non-empty relative path
    /// - [`BackupError::Io`] if the copy fails
    /// - Process errors from staging or committing
    pub fn backup(&self, abs: &Path) -> Result<bool> {
        let _guard = self.store.write();
        self.backup_locked(abs)
    }

    /// [`VersionWriter::backup`] for callers already holding the write lock
    pub(crate) fn backup_locked(&self, abs: &Path) -> Result<bool> {
        if abs.as_os_str().is_empty() {
            return Ok(false);
        }
        match self.snapshot(abs) {
            Ok(()) => Ok(true),
            Err(e) if e.is_silent() => {
                debug!("Skipping backup: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Store-relative path of `abs`, or the silent error explaining why it
    /// cannot be backed up
    ///
    /// Rules see the canonical spelling, so `/a/./b` and `//a/b` are filtered
    /// exactly like `/a/b`, the entry they share in the store.
    fn eligible_path(&self, abs: &Path) -> Result<PathBuf> {
        if !path_map::is_absolute(abs) {
            return Err(BackupError::NotAbsolutePath(abs.to_path_buf()));
        }
        let rel = path_map::to_store_relative(abs).ok_or_else(|| BackupError::FileMissing(abs.to_path_buf()))?;
        let canonical = path_map::to_absolute(&rel);

        if let Some(rule) = self.filter.matching_rule(&canonical) {
            return Err(BackupError::Excluded {
                path: canonical,
                rule: rule.to_string(),
            });
        }
        // Never back the store up into itself.
        if canonical.starts_with(self.store.root()) {
            return Err(BackupError::Excluded {
                path: canonical,
                rule: self.store.root().display().to_string(),
            });
        }
        match fs::metadata(abs) {
            Ok(metadata) if metadata.is_file() => Ok(rel),
            Ok(_) => Err(BackupError::FileMissing(abs.to_path_buf())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackupError::FileMissing(abs.to_path_buf())),
            Err(e) => Err(e.into()),
        }
    }

    fn snapshot(&self, abs: &Path) -> Result<()> {
        let rel = self.eligible_path(abs)?;

        if self.store.ensure_initialized_locked()? {
            info!("Created backup store for first backup of {:?}", abs);
        }

        let root = self.store.root();
        let bytes = utils::copy_snapshot(abs, &root.join(&rel))?;

        let owner = path_map::trailer_value(&rel);
        self.store.vcs().add(root, &owner)?;
        self.store.vcs().commit(root, COMMIT_SUBJECT, &owner)?;

        debug!("Backed up {:?} ({})", abs, utils::format_bytes(bytes));
        Ok(())
    }
}
