//! File helpers shared by the writer, the rewriter and the CLI
//!
//! Snapshot copies keep permission bits and the modification time of the
//! source. Restores go through a temporary file and a rename so a reader
//! never sees a half-written file.

use crate::error::Result;
use filetime::FileTime;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::trace;
use walkdir::WalkDir;

/// Copy `source` to `dest`, replacing any previous snapshot
///
/// Parent directories are created as needed. Permission bits are carried by
/// the copy itself; the modification time is set afterwards.
///
/// # Returns
///
/// Number of bytes copied.
///
/// # Errors
///
/// - [`BackupError::Io`](crate::BackupError::Io) if reading, writing or
///   setting attributes fails
pub fn copy_snapshot(source: &Path, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    // A read-only snapshot cannot be overwritten in place.
    match fs::remove_file(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let bytes = fs::copy(source, dest)?;
    let metadata = fs::metadata(source)?;
    filetime::set_file_mtime(dest, FileTime::from_last_modification_time(&metadata))?;

    trace!("Copied {} bytes from {:?} to {:?}", bytes, source, dest);
    Ok(bytes)
}

/// Delete the snapshot at `root/rel` and any directories left empty above it
///
/// Missing files are not an error. Never removes `root` itself.
pub fn remove_snapshot(root: &Path, rel: &Path) -> Result<()> {
    let path = root.join(rel);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        // git may already have pruned the directory on checkout.
        if !remove_dir_if_empty(current)? && current.exists() {
            break;
        }
        dir = current.parent();
    }
    Ok(())
}

/// Remove `path` if it is an empty directory; returns whether it was removed
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Ok(false);
            }
            fs::remove_dir(path)?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Replace the content of `path` atomically, keeping its permissions
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.git-backup-tmp", file_name));

    fs::write(&temp_path, content)?;
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(&temp_path, metadata.permissions())?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Format bytes as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Total size of the regular files under `path`; zero if it does not exist
pub fn dir_size(path: &Path) -> Result<u64> {
    Ok(WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum())
}
