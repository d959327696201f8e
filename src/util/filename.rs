//! File naming conventions next to a capped log file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

fn with_suffix(log_path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    log_path.with_file_name(name)
}

/// Generate the lock file path.
pub fn lock_file_path(log_path: &Path) -> PathBuf {
    with_suffix(log_path, ".lock")
}

/// Generate the temporary file path used while rewriting for a resize.
pub fn resize_temp_path(log_path: &Path) -> PathBuf {
    with_suffix(log_path, ".resize.tmp")
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create the parent directory of a file if it doesn't exist.
pub fn create_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Sync the directory containing `path` so a rename is durable.
#[cfg(unix)]
pub fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

/// Directory handles cannot be synced on this platform.
#[cfg(not(unix))]
pub fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
