//! Utility functions for the installer.

use std::fs;
use std::io;
use std::path::{Component, Path};

/// Create a directory and its parents, tolerating a concurrent creator.
///
/// An `AlreadyExists` error is accepted when the path turns out to be a
/// directory after all.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a file, symlink or directory tree if it exists.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Remove everything inside `dir`, keeping the directory itself.
pub fn empty_directory(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        remove_path(&entry?.path())?;
    }
    Ok(())
}

/// Check that a relative archive entry path stays inside its destination.
///
/// Absolute paths, drive prefixes and `..` components are rejected.
pub fn is_safe_relative_path(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
