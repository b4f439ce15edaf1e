//! Error types for the git-backup library
//!
//! This module defines every error that can surface from the backup engine.
//! Some of them (missing files, excluded paths, stale revisions) are part of
//! normal interactive use and are absorbed by the engine before they reach a
//! caller; [`BackupError::is_silent`] identifies that group.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Type alias for Results in the git-backup library
pub type Result<T> = std::result::Result<T, BackupError>;

/// Main error type for all backup operations
#[derive(Debug, Error)]
pub enum BackupError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors while reading or writing the JSON configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A relative or empty path was given where an absolute one is required
    #[error("Not an absolute path: {0:?}")]
    NotAbsolutePath(PathBuf),

    /// The file to back up does not exist or is not a regular file
    #[error("File missing: {0:?}")]
    FileMissing(PathBuf),

    /// The path matched an exclusion rule
    #[error("Path {path:?} is excluded by rule '{rule}'")]
    Excluded {
        /// Path that was rejected
        path: PathBuf,
        /// Rule that matched it
        rule: String,
    },

    /// The shadow store has no repository metadata yet
    ///
    /// Silent: reads of an uninitialized store come back empty, and the
    /// first backup creates the store instead of failing.
    #[error("Backup store not initialized at path: {0:?}")]
    StoreUninitialized(PathBuf),

    /// Remove/combine requested while the combine policy forbids rewrites
    #[error("Combining and removing backups is disabled by configuration")]
    CombiningDisabled,

    /// The version-control binary exited with a non-zero status
    #[error("Command `{command}` failed ({status}): {stderr}")]
    ProcessFailure {
        /// Command line that was executed
        command: String,
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// The version-control binary could not be launched
    #[error("Failed to launch {program:?}: {source}")]
    ProcessSpawn {
        /// Program that was being launched
        program: PathBuf,
        /// Underlying launch error
        #[source]
        source: std::io::Error,
    },

    /// The version-control binary did not finish in time and was killed
    #[error("Command `{command}` timed out after {}", humantime::format_duration(*.timeout))]
    CommandTimeout {
        /// Command line that was executed
        command: String,
        /// Configured timeout
        timeout: Duration,
    },

    /// A revision id is no longer valid for the file
    #[error("Stale revision: {0}")]
    StaleRevision(String),

    /// The parallel label and id log queries returned different lengths
    #[error("History log mismatch: {labels} labels but {ids} revision ids")]
    LogMismatch {
        /// Number of label entries
        labels: usize,
        /// Number of id entries
        ids: usize,
    },

    /// An exclusion rule is not a valid regular expression
    #[error("Invalid exclusion rule '{pattern}': {source}")]
    InvalidPattern {
        /// Rule text as configured
        pattern: String,
        /// Regex compilation error
        #[source]
        source: regex::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackupError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        BackupError::Internal(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        BackupError::InvalidConfiguration(msg.into())
    }

    /// Check if this error is absorbed as a no-op at the engine boundary
    ///
    /// Missing files, excluded paths, stale revisions and a store that does
    /// not exist yet are expected in interactive use; there is nothing to
    /// report when there is nothing to do.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            BackupError::FileMissing(_)
                | BackupError::Excluded { .. }
                | BackupError::StaleRevision(_)
                | BackupError::StoreUninitialized(_)
        )
    }

    /// Check if this error came from running the version-control binary
    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            BackupError::ProcessFailure { .. }
                | BackupError::ProcessSpawn { .. }
                | BackupError::CommandTimeout { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            BackupError::NotAbsolutePath(path) => {
                format!("{:?} is not an absolute path. Backups are keyed by absolute paths.", path)
            }
            BackupError::CombiningDisabled => {
                "Removing or combining backups is disabled. Set 'combine_policy' to \
                 'always_ask' or 'never_ask' to allow it."
                    .to_string()
            }
            BackupError::ProcessSpawn { program, .. } => {
                format!(
                    "Could not run {:?}. Check that git is installed or set 'git_binary' in the configuration.",
                    program
                )
            }
            BackupError::CommandTimeout { .. } => {
                format!(
                    "{}. Another git process may hold the store lock; raise 'command_timeout_secs' if the store is large.",
                    self
                )
            }
            BackupError::InvalidPattern { pattern, .. } => {
                format!("Exclusion rule '{}' is not a valid regular expression.", pattern)
            }
            _ => self.to_string(),
        }
    }
}
