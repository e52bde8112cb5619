//! Archive extraction (zip, tar, tar.gz, tar.bz2, tar.xz).
//!
//! External `unzip`/`tar` binaries are preferred. When they are missing, or
//! the built-in extractor is forced, plain and gzipped tarballs are unpacked
//! in-process by [`builtin`]; zip and bzip2/xz tarballs are not supported
//! there.

mod builtin;

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::util::ensure_dir;
use crate::{Result, RigError};

/// Supported archive types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveType {
    /// Detect archive type from a file name or URL suffix
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .to_lowercase();

        if name.ends_with(".zip") {
            Some(ArchiveType::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveType::TarGz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(ArchiveType::TarBz2)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(ArchiveType::TarXz)
        } else if name.ends_with(".tar") {
            Some(ArchiveType::Tar)
        } else {
            None
        }
    }

    /// Detect archive type from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_name(&path.to_string_lossy())
    }

    /// Name of the external tool that unpacks this format
    fn tool(self) -> &'static str {
        match self {
            ArchiveType::Zip => "unzip",
            _ => "tar",
        }
    }

    fn tool_args(self, archive: &Path, dest: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = match self {
            ArchiveType::Zip => {
                return vec![
                    "-q".into(),
                    "-o".into(),
                    archive.into(),
                    "-d".into(),
                    dest.into(),
                ]
            }
            ArchiveType::Tar => vec!["-xf".into()],
            ArchiveType::TarGz => vec!["-xzf".into()],
            ArchiveType::TarBz2 => vec!["-xjf".into()],
            ArchiveType::TarXz => vec!["-xJf".into()],
        };
        args.push(archive.into());
        args.push("-C".into());
        args.push(dest.into());
        args
    }
}

/// Archive extractor
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    builtin_only: bool,
    dry_run: bool,
}

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never call external tools; only the in-process tar decoder is used
    pub fn with_builtin_only(mut self, builtin_only: bool) -> Self {
        self.builtin_only = builtin_only;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Extract an archive into `dest_dir`.
    ///
    /// The format comes from the suffix of `name_hint` when given (the
    /// download URL, for instance) and from `archive_path` otherwise.
    pub async fn extract(
        &self,
        archive_path: &Path,
        dest_dir: &Path,
        name_hint: Option<&str>,
    ) -> Result<()> {
        let archive_type = name_hint
            .and_then(ArchiveType::from_name)
            .or_else(|| ArchiveType::from_path(archive_path))
            .ok_or_else(|| RigError::extraction(archive_path, "unrecognized archive format"))?;

        if self.dry_run {
            log::info!(
                "[dry-run] Would extract {} to {}",
                archive_path.display(),
                dest_dir.display()
            );
            return Ok(());
        }

        ensure_dir(dest_dir).map_err(|e| RigError::fs("Failed to create directory", dest_dir, e))?;

        if !self.builtin_only {
            if let Some(tool) = find_tool(archive_type.tool()) {
                return self.extract_external(&tool, archive_type, archive_path, dest_dir).await;
            }
            log::debug!(
                "{} not found on PATH, using built-in extractor",
                archive_type.tool()
            );
        }

        self.extract_builtin(archive_type, archive_path, dest_dir).await
    }

    async fn extract_external(
        &self,
        tool: &Path,
        archive_type: ArchiveType,
        archive_path: &Path,
        dest_dir: &Path,
    ) -> Result<()> {
        log::debug!("Extracting {} with {}", archive_path.display(), tool.display());

        let output = Command::new(tool)
            .args(archive_type.tool_args(archive_path, dest_dir))
            .output()
            .await
            .map_err(|e| RigError::extraction(archive_path, format!("failed to run {}: {}", tool.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RigError::extraction(
                archive_path,
                format!("{} exited with {}: {}", archive_type.tool(), output.status, stderr.trim()),
            ));
        }

        Ok(())
    }

    async fn extract_builtin(
        &self,
        archive_type: ArchiveType,
        archive_path: &Path,
        dest_dir: &Path,
    ) -> Result<()> {
        let gzip = match archive_type {
            ArchiveType::Tar => false,
            ArchiveType::TarGz => true,
            ArchiveType::Zip => {
                return Err(RigError::extraction(
                    archive_path,
                    "zip archives are not supported by the built-in extractor; install unzip",
                ))
            }
            ArchiveType::TarBz2 | ArchiveType::TarXz => {
                return Err(RigError::extraction(
                    archive_path,
                    "bzip2 and xz tarballs are not supported by the built-in extractor; install tar",
                ))
            }
        };

        let archive_path = archive_path.to_path_buf();
        let dest_dir = dest_dir.to_path_buf();
        let count = tokio::task::spawn_blocking(move || {
            let data = builtin::read_archive(&archive_path, gzip)?;
            builtin::unpack_tar(&data, &dest_dir, &archive_path)
        })
        .await
        .map_err(|e| RigError::Io(std::io::Error::other(e)))??;

        log::debug!("Unpacked {} entries with the built-in extractor", count);
        Ok(())
    }
}

fn find_tool(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}
