//! Shadow store lifecycle
//!
//! The [`Store`] owns the backup repository directory: lazy creation with a
//! fixed committer identity, the raw command channel, garbage collection and
//! the lock that serializes every mutation of the repository.
//!
//! ## Locking
//!
//! One [`parking_lot::RwLock`] guards each store. Initialization, backups,
//! rewrites and gc take the write side; history reads take the read side. The
//! lock is not reentrant, so composite operations take it once and call the
//! `*_locked` variants.

use crate::error::{BackupError, Result};
use crate::path_map;
use crate::vcs::VersionControl;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Committer name recorded on every backup
pub const COMMITTER_NAME: &str = "git-backup";

/// Committer email recorded on every backup
pub const COMMITTER_EMAIL: &str = "git-backup@localhost";

/// Repository-local settings every store must carry before it takes commits
const STORE_CONFIG: [(&str, &str); 3] = [
    ("user.name", COMMITTER_NAME),
    ("user.email", COMMITTER_EMAIL),
    ("commit.gpgsign", "false"),
];

/// A shadow backup repository rooted at one directory
pub struct Store {
    root: PathBuf,
    vcs: Arc<dyn VersionControl>,
    lock: RwLock<()>,
    /// Set once the repository exists with its identity applied
    configured: AtomicBool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("vcs", &self.vcs)
            .finish()
    }
}

impl Store {
    /// Create a handle for the store at `root`; nothing touches the disk yet
    pub fn new(root: impl Into<PathBuf>, vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            root: root.into(),
            vcs,
            lock: RwLock::new(()),
            configured: AtomicBool::new(false),
        }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version-control client used by this store
    pub fn vcs(&self) -> &dyn VersionControl {
        self.vcs.as_ref()
    }

    /// Whether repository metadata exists
    pub fn is_initialized(&self) -> bool {
        self.root.join(".git").exists()
    }

    /// Shared access for history reads
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Exclusive access for mutations
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    /// Fail with [`BackupError::StoreUninitialized`] if there is no repository yet
    pub fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(BackupError::StoreUninitialized(self.root.clone()))
        }
    }

    /// Create and configure the repository if it does not exist yet
    ///
    /// Returns `true` if this call created the repository. Concurrent
    /// callers converge: exactly one initializes, the rest observe the result.
    /// A repository left without its committer identity by an earlier failed
    /// setup is configured again.
    ///
    /// # Errors
    ///
    /// - [`BackupError::Io`] if the directory cannot be created
    /// - Process errors from `init` or identity configuration
    pub fn ensure_initialized(&self) -> Result<bool> {
        if self.configured.load(Ordering::Acquire) && self.is_initialized() {
            return Ok(false);
        }
        let _guard = self.lock.write();
        self.ensure_initialized_locked()
    }

    /// [`Store::ensure_initialized`] for callers already holding the write lock
    pub(crate) fn ensure_initialized_locked(&self) -> Result<bool> {
        if self.configured.load(Ordering::Acquire) && self.is_initialized() {
            return Ok(false);
        }

        let created = !self.is_initialized();
        if created {
            info!("Initializing backup store at {:?}", self.root);
            fs::create_dir_all(&self.root)?;
            self.vcs.init(&self.root)?;
        }

        if created || !self.is_configured()? {
            if !created {
                warn!("Backup store at {:?} is missing its configuration, applying it again", self.root);
            }
            for (key, value) in STORE_CONFIG {
                self.vcs.set_config(&self.root, key, value)?;
            }
        }

        self.configured.store(true, Ordering::Release);
        Ok(created)
    }

    fn is_configured(&self) -> Result<bool> {
        for (key, value) in STORE_CONFIG {
            if self.vcs.get_config(&self.root, key)?.as_deref() != Some(value) {
                debug!("{} is not set to {:?} in {:?}", key, value, self.root);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run a raw version-control command in the store
    ///
    /// Returns empty output without running anything if the store is not
    /// initialized.
    ///
    /// # Errors
    ///
    /// - [`BackupError::ProcessFailure`] on a non-zero exit status
    /// - [`BackupError::ProcessSpawn`] / [`BackupError::CommandTimeout`] from the client
    pub fn run_command<S: AsRef<std::ffi::OsStr>>(
        &self,
        args: &[S],
        strip_trailing_newline: bool,
    ) -> Result<String> {
        match self.require_initialized() {
            Ok(()) => {}
            Err(e) if e.is_silent() => {
                debug!("{}, skipping command", e);
                return Ok(String::new());
            }
            Err(e) => return Err(e),
        }

        let args: Vec<OsString> = args.iter().map(|a| a.as_ref().to_os_string()).collect();
        let output = self.vcs.run(&self.root, &args, &[])?;
        if !output.success() {
            return Err(BackupError::ProcessFailure {
                command: describe(&args),
                status: output
                    .code
                    .map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {}", c)),
                stderr: output.stderr_text(),
            });
        }
        Ok(output.stdout_text(strip_trailing_newline))
    }

    /// Compact the repository; failures are logged and swallowed
    pub fn gc(&self) {
        let _guard = self.lock.write();
        self.gc_locked(false);
    }

    pub(crate) fn gc_locked(&self, prune_now: bool) {
        if !self.is_initialized() {
            return;
        }
        info!("Running gc on {:?} (prune_now = {})", self.root, prune_now);
        if let Err(e) = self.vcs.gc(&self.root, prune_now) {
            warn!("gc failed on {:?}: {}", self.root, e);
        }
    }

    /// Absolute paths of every file currently tracked by the store
    pub fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        let _guard = self.lock.read();
        if !self.is_initialized() {
            return Ok(Vec::new());
        }
        Ok(self
            .vcs
            .ls_files(&self.root)?
            .iter()
            .map(|rel| path_map::to_absolute(Path::new(rel)))
            .collect())
    }
}

fn describe(args: &[OsString]) -> String {
    std::iter::once("git".to_string())
        .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}
