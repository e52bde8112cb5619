//! Staged installs that publish a destination directory in one rename.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::archive::ArchiveExtractor;
use crate::util::{ensure_dir, remove_path};
use crate::{Result, RigError};

use super::mirror::copy_contents;

/// Removes a staging directory when dropped, whatever happened to it.
struct StagingGuard {
    path: PathBuf,
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Err(e) = remove_path(&self.path) {
            log::warn!("Failed to remove staging directory {}: {}", self.path.display(), e);
        }
    }
}

/// Installs package content so a destination is never half written
pub struct AtomicInstaller {
    extractor: ArchiveExtractor,
    /// Private area where archives are unpacked before staging
    scratch_dir: PathBuf,
    dry_run: bool,
    external_copy: bool,
}

impl AtomicInstaller {
    pub fn new(extractor: ArchiveExtractor, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            scratch_dir: scratch_dir.into(),
            dry_run: false,
            external_copy: true,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Allow copying with the system `cp`
    pub fn with_external_copy(mut self, external_copy: bool) -> Self {
        self.external_copy = external_copy;
        self
    }

    /// Staging directory next to `dest_dir`, unique per package, time and process
    pub fn staging_path(package_id: &str, dest_dir: &Path) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let name = format!(".{}.staging-{}-{}", package_id, millis, std::process::id());
        match dest_dir.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Copy `src_dir` into a staging directory, then swap it in place of `dest_dir`.
    ///
    /// On any failure before the final rename `dest_dir` is left as it was.
    pub async fn install_directory(&self, package_id: &str, src_dir: &Path, dest_dir: &Path) -> Result<()> {
        if self.dry_run {
            log::info!(
                "[dry-run] Would install {} from {} to {}",
                package_id,
                src_dir.display(),
                dest_dir.display()
            );
            return Ok(());
        }

        if !src_dir.is_dir() {
            return Err(RigError::fs(
                "Source is not a directory:",
                src_dir,
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }

        let staging = Self::staging_path(package_id, dest_dir);
        if let Some(parent) = staging.parent() {
            ensure_dir(parent).map_err(|e| RigError::fs("Failed to create directory", parent, e))?;
        }
        fs::create_dir(&staging).map_err(|e| RigError::fs("Failed to create staging directory", &staging, e))?;
        let guard = StagingGuard { path: staging };

        log::debug!("Staging {} in {}", package_id, guard.path.display());
        copy_contents(src_dir, &guard.path, self.external_copy).await?;

        remove_path(dest_dir).map_err(|e| RigError::fs("Failed to remove previous install", dest_dir, e))?;
        fs::rename(&guard.path, dest_dir).map_err(|e| RigError::fs("Failed to publish", dest_dir, e))?;

        log::debug!("Published {} to {}", package_id, dest_dir.display());
        Ok(())
    }

    /// Extract an archive privately, unwrap a single root folder, then install it.
    pub async fn install_archive(
        &self,
        package_id: &str,
        archive_path: &Path,
        name_hint: Option<&str>,
        dest_dir: &Path,
    ) -> Result<()> {
        if self.dry_run {
            log::info!(
                "[dry-run] Would extract {} and install {} to {}",
                archive_path.display(),
                package_id,
                dest_dir.display()
            );
            return Ok(());
        }

        ensure_dir(&self.scratch_dir)
            .map_err(|e| RigError::fs("Failed to create directory", &self.scratch_dir, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", package_id))
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| RigError::fs("Failed to create directory in", &self.scratch_dir, e))?;

        self.extractor.extract(archive_path, scratch.path(), name_hint).await?;

        let root = unwrap_root(scratch.path())
            .map_err(|e| RigError::fs("Failed to read", scratch.path(), e))?;
        if root != scratch.path() {
            log::debug!("Archive has a single root folder, installing its contents");
        }

        self.install_directory(package_id, &root, dest_dir).await
    }
}

/// The single top-level directory of an extracted tree, or the tree itself.
///
/// Unwrapping only happens when there is exactly one entry and it is a real
/// directory; any top-level file keeps the tree as is.
pub fn unwrap_root(dir: &Path) -> io::Result<PathBuf> {
    let mut entries = fs::read_dir(dir)?;

    let Some(first) = entries.next().transpose()? else {
        return Ok(dir.to_path_buf());
    };
    if entries.next().is_some() {
        return Ok(dir.to_path_buf());
    }

    if first.file_type()?.is_dir() {
        Ok(first.path())
    } else {
        Ok(dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn installer(temp: &TempDir) -> AtomicInstaller {
        AtomicInstaller::new(
            ArchiveExtractor::new().with_builtin_only(true),
            temp.path().join("scratch"),
        )
        .with_external_copy(false)
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let path = AtomicInstaller::staging_path("core", Path::new("/games/engines/core"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        assert_eq!(path.parent(), Some(Path::new("/games/engines")));
        assert!(name.starts_with(".core.staging-"), "{}", name);
        assert!(name.ends_with(&format!("-{}", std::process::id())));
    }

    #[test]
    fn test_unwrap_root() {
        let temp = TempDir::new().unwrap();

        // Empty tree stays as is
        assert_eq!(unwrap_root(temp.path()).unwrap(), temp.path());

        fs::create_dir(temp.path().join("pkg-1.0")).unwrap();
        assert_eq!(unwrap_root(temp.path()).unwrap(), temp.path().join("pkg-1.0"));

        fs::write(temp.path().join("README"), b"x").unwrap();
        assert_eq!(unwrap_root(temp.path()).unwrap(), temp.path());
    }

    #[test]
    fn test_unwrap_root_single_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("only.txt"), b"x").unwrap();

        assert_eq!(unwrap_root(temp.path()).unwrap(), temp.path());
    }

    #[tokio::test]
    async fn test_install_directory_replaces_previous() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("root/engines/core");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("new.txt"), b"new").unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("old.txt"), b"old").unwrap();

        installer(&temp).install_directory("core", &src, &dest).await.unwrap();

        assert_eq!(fs::read(dest.join("new.txt")).unwrap(), b"new");
        assert!(!dest.join("old.txt").exists());

        // No staging leftovers next to the destination
        let leftovers: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".staging-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_install_directory_missing_source_keeps_destination() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), b"keep").unwrap();

        let result = installer(&temp)
            .install_directory("core", &temp.path().join("missing"), &dest)
            .await;

        assert!(result.is_err());
        assert_eq!(fs::read(dest.join("keep.txt")).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let dest = temp.path().join("dest");

        let installer = installer(&temp).with_dry_run(true);
        installer.install_directory("core", &src, &dest).await.unwrap();
        installer
            .install_archive("core", &temp.path().join("x.tar"), None, &dest)
            .await
            .unwrap();

        assert!(!dest.exists());
        assert!(!temp.path().join("scratch").exists());
    }

    #[tokio::test]
    async fn test_failed_extraction_keeps_destination() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("broken.tar.gz");
        fs::write(&archive, b"not a gzip stream").unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), b"keep").unwrap();

        let result = installer(&temp).install_archive("core", &archive, None, &dest).await;

        assert!(matches!(result, Err(RigError::Extraction { .. })));
        assert_eq!(fs::read(dest.join("keep.txt")).unwrap(), b"keep");
        // Scratch extraction directory was cleaned up
        assert_eq!(fs::read_dir(temp.path().join("scratch")).unwrap().count(), 0);
    }
}
