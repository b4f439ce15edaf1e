//! Engine configuration
//!
//! [`BackupConfig`] is an explicit value handed to the engine at construction;
//! nothing is read from process-wide state after that. It can be persisted as
//! pretty-printed JSON, by default at `<config dir>/git-backup/config.json`.

use crate::error::{BackupError, Result};
use crate::types::CombinePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default label format: commit date and relative age
pub const DEFAULT_LOG_FORMAT: &str = "%cd, %ar";

/// Default `strftime`-style format used for `%cd` in labels
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default timeout for a single git invocation, in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Configuration for a [`GitBackup`](crate::GitBackup) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Root of the shadow store
    pub store_path: PathBuf,
    /// git executable; a bare name is resolved through `PATH`
    pub git_binary: PathBuf,
    /// `git log --format` string producing each revision label
    pub log_format: String,
    /// Date format applied to `%cd`/`%ad` in labels
    pub date_format: String,
    /// Regular expressions, each matched against the whole absolute path
    pub exclusion_rules: Vec<String>,
    /// Whether remove/combine ask first, proceed, or are refused
    pub combine_policy: CombinePolicy,
    /// Timeout for one git invocation, in seconds
    pub command_timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            git_binary: PathBuf::from("git"),
            log_format: DEFAULT_LOG_FORMAT.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            exclusion_rules: Vec::new(),
            combine_policy: CombinePolicy::default(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl BackupConfig {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("git-backup").join("config.json"))
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let config: BackupConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Timeout for one git invocation
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Set the git timeout, rounded up to whole seconds and at least one
    pub fn set_command_timeout(&mut self, timeout: Duration) {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.command_timeout_secs = secs.max(1);
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<()> {
        if self.store_path.as_os_str().is_empty() {
            return Err(BackupError::invalid_configuration("store_path is empty"));
        }
        if !self.store_path.is_absolute() {
            return Err(BackupError::invalid_configuration(format!(
                "store_path {:?} must be absolute",
                self.store_path
            )));
        }
        if self.git_binary.as_os_str().is_empty() {
            return Err(BackupError::invalid_configuration("git_binary is empty"));
        }
        if self.log_format.is_empty() {
            return Err(BackupError::invalid_configuration("log_format is empty"));
        }
        if self.command_timeout_secs == 0 {
            return Err(BackupError::invalid_configuration(
                "command_timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// `$HOME/.git-backup`, or a directory under the system temp dir when there is no home
pub fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".git-backup")
}
