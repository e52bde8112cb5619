//! Directory copy used to fill staging directories.

use std::fs;
use std::path::Path;

use tokio::process::Command;
use walkdir::WalkDir;

use crate::util::{empty_directory, ensure_dir};
use crate::{Result, RigError};

/// Copy the contents of `source` into the existing directory `dest`.
///
/// Uses the system `cp` when `allow_external` is set and it can be found,
/// and an in-process mirror otherwise.
pub async fn copy_contents(source: &Path, dest: &Path, allow_external: bool) -> Result<()> {
    if allow_external && cfg!(unix) {
        if let Ok(cp) = which::which("cp") {
            log::debug!("Copying {} with {}", source.display(), cp.display());
            let output = Command::new(&cp)
                .arg("-R")
                .arg(source.join("."))
                .arg(dest)
                .output()
                .await
                .map_err(|e| RigError::fs("Failed to run cp for", source, e))?;

            if output.status.success() {
                return Ok(());
            }
            log::warn!(
                "cp failed ({}), falling back to in-process copy: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return mirror_into(source, dest, true).await;
        }
    }

    mirror_into(source, dest, false).await
}

/// Run [`mirror_directory`] on a blocking thread, first emptying `dest` when
/// an earlier copy may have left part of the tree behind.
async fn mirror_into(source: &Path, dest: &Path, clean: bool) -> Result<()> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if clean {
            empty_directory(&dest).map_err(|e| RigError::fs("Failed to empty", &dest, e))?;
        }
        mirror_directory(&source, &dest)
    })
    .await
    .map_err(|e| RigError::Io(std::io::Error::other(e)))?
}

/// Mirror (copy) a directory tree, keeping permissions and recreating symlinks
pub fn mirror_directory(source: &Path, dest: &Path) -> Result<()> {
    ensure_dir(dest).map_err(|e| RigError::fs("Failed to create directory", dest, e))?;

    for entry in WalkDir::new(source).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            RigError::fs("Failed to read", path, e.into())
        })?;
        let path = entry.path();
        let relative = path.strip_prefix(source).unwrap_or(path);
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir(&target).map_err(|e| RigError::fs("Failed to create directory", &target, e))?;
        } else if file_type.is_file() {
            fs::copy(path, &target).map_err(|e| RigError::fs("Failed to copy", path, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(path, &target)?;
        }
        // Sockets, fifos and devices are skipped
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(path: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(path).map_err(|e| RigError::fs("Failed to read link", path, e))?;
    std::os::unix::fs::symlink(&link, target).map_err(|e| RigError::fs("Failed to create link", target, e))
}

#[cfg(not(unix))]
fn copy_symlink(path: &Path, target: &Path) -> Result<()> {
    // Without symlink privileges the link target is copied instead
    if path.is_dir() {
        mirror_directory(path, target)
    } else {
        fs::copy(path, target)
            .map(|_| ())
            .map_err(|e| RigError::fs("Failed to copy", path, e))
    }
}
