//! Removal of installed packages that are no longer configured.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::util::remove_path;
use crate::{Result, RigError};

/// Directory names that are never purged, whatever the configuration says
pub const PRESERVED_NAMES: &[&str] = &["sandbox"];

/// Purges stale package directories from a kind's destination root
#[derive(Debug, Clone)]
pub struct Reconciler {
    dry_run: bool,
    preserved: Vec<String>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            dry_run: false,
            preserved: PRESERVED_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replace the preserve-list
    pub fn with_preserved<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preserved = names.into_iter().map(Into::into).collect();
        self
    }

    fn is_preserved(&self, name: &str) -> bool {
        self.preserved.iter().any(|p| p == name)
    }

    /// Remove every subdirectory of `root` whose name is neither in `keep`
    /// nor preserved.
    ///
    /// Returns the removed paths, or in dry-run the paths that would be
    /// removed. A missing root purges nothing; plain files are left alone.
    pub fn purge(&self, root: &Path, keep: &HashSet<String>) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RigError::fs("Failed to read", root, e)),
        };

        let mut stale = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RigError::fs("Failed to read", root, e))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if keep.contains(&name) || self.is_preserved(&name) {
                continue;
            }
            stale.push(entry.path());
        }
        stale.sort();

        let mut purged = Vec::with_capacity(stale.len());
        for path in stale {
            if self.dry_run {
                log::info!("[dry-run] Would remove {}", path.display());
                purged.push(path);
                continue;
            }

            match remove_path(&path) {
                Ok(()) => {
                    log::info!("Removed {}", path.display());
                    purged.push(path);
                }
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        Ok(purged)
    }
}
