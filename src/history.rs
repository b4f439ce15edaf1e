//! Reading a file's backup history
//!
//! Revisions are listed by running two queries over the same log walk, one
//! rendering the configured label and one producing ids, timestamps and the
//! ownership trailer, then pairing them up. Git's newest-first order is kept
//! as is.
//!
//! Content is only served for an id that is still a live revision of the
//! file: a well-formed id, reachable from `HEAD`, with a log entry limited to
//! the file's path. Anything else is a stale id and yields `None`.

use crate::error::{BackupError, Result};
use crate::path_map;
use crate::store::Store;
use crate::types::Revision;
use crate::vcs::LogEntry;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Lists revisions and fetches their content
#[derive(Debug, Clone)]
pub struct HistoryReader {
    store: Arc<Store>,
    log_format: String,
    date_format: String,
}

impl HistoryReader {
    /// Create a reader rendering labels with `log_format` and `date_format`
    pub fn new(store: Arc<Store>, log_format: impl Into<String>, date_format: impl Into<String>) -> Self {
        Self {
            store,
            log_format: log_format.into(),
            date_format: date_format.into(),
        }
    }

    /// Revisions of `abs`, newest first
    ///
    /// Empty if the store is not initialized or the file is not tracked.
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotAbsolutePath`] for a relative or empty path
    /// - [`BackupError::LogMismatch`] if the two log queries disagree in length
    /// - Process errors from the log queries
    pub fn list_revisions(&self, abs: &Path) -> Result<Vec<Revision>> {
        if !path_map::is_absolute(abs) {
            return Err(BackupError::NotAbsolutePath(abs.to_path_buf()));
        }
        let Some(rel) = path_map::to_store_relative(abs) else {
            return Ok(Vec::new());
        };
        let _guard = self.store.read();
        self.list_locked(&path_map::trailer_value(&rel))
    }

    /// [`HistoryReader::list_revisions`] keyed by owner, lock already held
    pub(crate) fn list_locked(&self, owner: &str) -> Result<Vec<Revision>> {
        match self.store.require_initialized() {
            Ok(()) => {}
            Err(e) if e.is_silent() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        let root = self.store.root();
        let vcs = self.store.vcs();
        if !vcs.is_tracked(root, owner)? {
            debug!("{} is not tracked in {:?}", owner, root);
            return Ok(Vec::new());
        }

        let labels = vcs.log_labels(root, &self.log_format, &self.date_format)?;
        let entries = vcs.log_entries(root)?;
        pair_revisions(labels, entries, owner)
    }

    /// Exact bytes of `abs` at revision `rev`
    ///
    /// `None` when either argument is empty, the store is not initialized, or
    /// `rev` is not a live revision of this file.
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotAbsolutePath`] for a non-empty relative path
    /// - Process errors other than the lookups failing
    pub fn fetch_content(&self, rev: &str, abs: &Path) -> Result<Option<Vec<u8>>> {
        if rev.is_empty() || abs.as_os_str().is_empty() {
            return Ok(None);
        }
        if !path_map::is_absolute(abs) {
            return Err(BackupError::NotAbsolutePath(abs.to_path_buf()));
        }
        let Some(rel) = path_map::to_store_relative(abs) else {
            return Ok(None);
        };

        let _guard = self.store.read();
        match self.fetch_locked(rev, &path_map::trailer_value(&rel)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.is_silent() => {
                debug!("{}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn fetch_locked(&self, rev: &str, owner: &str) -> Result<Vec<u8>> {
        self.store.require_initialized()?;
        if !is_revision_id(rev) {
            return Err(BackupError::StaleRevision(rev.to_string()));
        }
        let root = self.store.root();
        let vcs = self.store.vcs();
        if !vcs.contains_revision(root, rev, owner)? {
            return Err(BackupError::StaleRevision(rev.to_string()));
        }
        vcs.show(root, rev, owner)?
            .ok_or_else(|| BackupError::StaleRevision(rev.to_string()))
    }
}

/// Pair rendered labels with log entries and keep those owned by `owner`
///
/// Both inputs must come from the same log walk. Order is preserved.
///
/// # Errors
///
/// - [`BackupError::LogMismatch`] if the lengths differ
pub fn pair_revisions(labels: Vec<String>, entries: Vec<LogEntry>, owner: &str) -> Result<Vec<Revision>> {
    if labels.len() != entries.len() {
        return Err(BackupError::LogMismatch {
            labels: labels.len(),
            ids: entries.len(),
        });
    }

    let revisions: Vec<Revision> = labels
        .into_iter()
        .zip(entries)
        .filter(|(_, entry)| entry.owner.as_deref() == Some(owner))
        .map(|(label, entry)| Revision {
            id: entry.id,
            label,
            committed_at: entry.committed_at,
        })
        .collect();

    trace!("{} revisions owned by {}", revisions.len(), owner);
    Ok(revisions)
}

/// Whether `rev` looks like a full or abbreviated commit id
pub fn is_revision_id(rev: &str) -> bool {
    (4..=64).contains(&rev.len()) && rev.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
