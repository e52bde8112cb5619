//! Package model: kinds, sources and per-run install outcomes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Result, RigError};

/// The three kinds of installable content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    Engine,
    Extension,
    Scenario,
}

impl PackageKind {
    /// Install order of the kinds
    pub const ALL: [PackageKind; 3] = [PackageKind::Engine, PackageKind::Extension, PackageKind::Scenario];

    /// Key of this kind in the configuration document, also its directory name
    pub fn key(self) -> &'static str {
        match self {
            PackageKind::Engine => "engines",
            PackageKind::Extension => "extensions",
            PackageKind::Scenario => "scenarios",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PackageKind::Engine => "engine",
            PackageKind::Extension => "extension",
            PackageKind::Scenario => "scenario",
        };
        f.write_str(name)
    }
}

/// Raw `{manifest?, path?}` entry as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawSource {
    #[serde(default)]
    pub manifest: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Where a package comes from; exactly one variant per package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    ManifestUrl(String),
    DirectUrl(String),
    LocalDirectory(PathBuf),
    LocalArchive(PathBuf),
}

impl SourceDescriptor {
    /// Resolve a raw entry. A manifest wins over a path.
    ///
    /// Relative local paths are taken relative to `base_dir`.
    pub fn resolve(package_id: &str, raw: &RawSource, base_dir: &Path) -> Result<Self> {
        let manifest = raw.manifest.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let path = raw.path.as_deref().map(str::trim).filter(|s| !s.is_empty());

        match (manifest, path) {
            (Some(manifest), path) => {
                if path.is_some() {
                    log::warn!("{} has both a manifest and a path, using the manifest", package_id);
                }
                Ok(SourceDescriptor::ManifestUrl(manifest.to_string()))
            }
            (None, Some(path)) => Self::classify(package_id, path, base_dir),
            (None, None) => Err(RigError::InvalidSource {
                package: package_id.to_string(),
                reason: "no manifest or path configured".to_string(),
            }),
        }
    }

    /// Classify a `path` value as a URL, a local directory or a local archive
    pub fn classify(package_id: &str, value: &str, base_dir: &Path) -> Result<Self> {
        let lower = value.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(SourceDescriptor::DirectUrl(value.to_string()));
        }

        let path = if lower.starts_with("file://") {
            url::Url::parse(value)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| RigError::InvalidSource {
                    package: package_id.to_string(),
                    reason: format!("invalid file URL {}", value),
                })?
        } else {
            let path = PathBuf::from(value);
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        if path.is_dir() {
            Ok(SourceDescriptor::LocalDirectory(path))
        } else {
            Ok(SourceDescriptor::LocalArchive(path))
        }
    }
}

/// A configured package, immutable for the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub id: String,
    pub kind: PackageKind,
    pub source: SourceDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    Installed,
    Skipped,
    Failed,
}

/// What happened to one package during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub package_id: String,
    pub kind: PackageKind,
    pub status: InstallStatus,
    pub error: Option<String>,
}

impl InstallOutcome {
    pub fn new(package_id: impl Into<String>, kind: PackageKind, status: InstallStatus) -> Self {
        Self {
            package_id: package_id.into(),
            kind,
            status,
            error: None,
        }
    }

    pub fn failed(package_id: impl Into<String>, kind: PackageKind, error: impl fmt::Display) -> Self {
        Self {
            package_id: package_id.into(),
            kind,
            status: InstallStatus::Failed,
            error: Some(error.to_string()),
        }
    }

    /// Installed or skipped
    pub fn success(&self) -> bool {
        self.status != InstallStatus::Failed
    }

    pub fn skipped(&self) -> bool {
        self.status == InstallStatus::Skipped
    }
}
