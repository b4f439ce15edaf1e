//! Destructive history rewrites
//!
//! Removing a file strips every tree entry and every commit it owns from all
//! refs, then expires reflogs and prunes so the old objects are gone for good.
//! Combining is a removal followed by a fresh backup under the same write lock.
//!
//! Rewrites change the ids of every commit made after the file's first backup.
//! Ids fetched before a rewrite must not be reused afterwards; the history
//! reader reports them as absent.

use crate::error::{BackupError, Result};
use crate::path_map;
use crate::store::Store;
use crate::types::{CombineOutcome, CombinePolicy, RemoveOutcome};
use crate::utils;
use crate::writer::VersionWriter;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Removes or collapses the history of single files
#[derive(Debug, Clone)]
pub struct HistoryRewriter {
    store: Arc<Store>,
    writer: VersionWriter,
    policy: CombinePolicy,
}

impl HistoryRewriter {
    /// Create a rewriter gated by `policy`; `writer` performs combine's re-backup
    pub fn new(store: Arc<Store>, writer: VersionWriter, policy: CombinePolicy) -> Self {
        Self { store, writer, policy }
    }

    /// Policy gating rewrites
    pub fn policy(&self) -> CombinePolicy {
        self.policy
    }

    /// Strip every revision of `abs` from the store
    ///
    /// # Errors
    ///
    /// - [`BackupError::CombiningDisabled`] if the policy forbids rewrites
    /// - [`BackupError::NotAbsolutePath`] for a relative or empty path
    /// - Process errors from the rewrite
    pub fn remove_file(&self, abs: &Path) -> Result<RemoveOutcome> {
        self.check_policy()?;
        let rel = mapped(abs)?;
        let _guard = self.store.write();
        self.remove_locked(rel.as_deref())
    }

    /// Collapse the history of `abs` into one fresh revision
    ///
    /// With [`CombinePolicy::AlwaysAsk`] nothing happens unless `confirmed`.
    ///
    /// # Errors
    ///
    /// - [`BackupError::CombiningDisabled`] if the policy forbids rewrites
    /// - [`BackupError::NotAbsolutePath`] for a relative or empty path
    /// - Process errors from the rewrite or the re-backup
    pub fn combine(&self, abs: &Path, confirmed: bool) -> Result<CombineOutcome> {
        self.check_policy()?;
        let rel = mapped(abs)?;
        if self.policy == CombinePolicy::AlwaysAsk && !confirmed {
            debug!("Combine of {:?} not confirmed", abs);
            return Ok(CombineOutcome::Declined);
        }

        let _guard = self.store.write();
        self.remove_locked(rel.as_deref())?;
        if self.writer.backup_locked(abs)? {
            info!("Combined history of {:?} into one revision", abs);
            Ok(CombineOutcome::Combined)
        } else {
            info!("Removed history of {:?}; file could not be backed up again", abs);
            Ok(CombineOutcome::RemovedOnly)
        }
    }

    fn check_policy(&self) -> Result<()> {
        if self.policy.allows_rewrite() {
            Ok(())
        } else {
            Err(BackupError::CombiningDisabled)
        }
    }

    fn remove_locked(&self, rel: Option<&Path>) -> Result<RemoveOutcome> {
        let Some(rel) = rel else {
            return Ok(RemoveOutcome::NothingToRemove);
        };
        if !self.store.is_initialized() {
            return Ok(RemoveOutcome::NothingToRemove);
        }

        let root = self.store.root();
        let vcs = self.store.vcs();
        let owner = path_map::trailer_value(rel);
        if !vcs.is_tracked(root, &owner)? {
            return Ok(RemoveOutcome::NothingToRemove);
        }

        let entries = vcs.log_entries(root)?;
        if entries.iter().all(|e| e.owner.as_deref() == Some(owner.as_str())) {
            // A rewrite cannot leave zero commits behind; drop the branch instead.
            info!("Dropping entire store history, all {} commits belong to {}", entries.len(), owner);
            if !entries.is_empty() {
                vcs.drop_history(root)?;
            }
            vcs.remove_from_index(root, &owner)?;
        } else {
            info!("Rewriting store history to remove {}", owner);
            vcs.filter_branch(root, &owner)?;
        }

        utils::remove_snapshot(root, rel)?;
        vcs.expire_rewritten(root)?;
        self.store.gc_locked(true);
        Ok(RemoveOutcome::Removed)
    }
}

/// Store-relative path for `abs`; `None` when absolute but unmappable
fn mapped(abs: &Path) -> Result<Option<std::path::PathBuf>> {
    if !path_map::is_absolute(abs) {
        return Err(BackupError::NotAbsolutePath(abs.to_path_buf()));
    }
    Ok(path_map::to_store_relative(abs))
}
