//! Active version selection and per-version package merging.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Map;

use super::document::{ConfigDocument, VersionConfig};
use crate::package::{PackageKind, PackageSpec, RawSource, SourceDescriptor};
use crate::{Result, RigError};

fn version_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^\d+(\.\d+){0,2}$").unwrap())
}

/// The version a run installs for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// Version string as requested
    pub requested: String,
    /// Major version used to look up the version map
    pub major: String,
    /// Whether the default major was used instead of the request
    pub fell_back: bool,
}

/// Map a requested version onto a major version.
///
/// `latest`, `stable` and anything that is not a dotted numeric version
/// fall back to `default_major`.
pub fn resolve_version(requested: &str, default_major: &str) -> ResolvedVersion {
    let trimmed = requested.trim();

    if version_regex().is_match(trimmed) {
        let major = trimmed.split('.').next().unwrap_or(trimmed);
        return ResolvedVersion {
            requested: requested.to_string(),
            major: major.to_string(),
            fell_back: false,
        };
    }

    if !matches!(trimmed.to_lowercase().as_str(), "latest" | "stable") {
        log::warn!("Unrecognized version '{}', using default {}", requested, default_major);
    } else {
        log::warn!("Version '{}' resolves to default {}", requested, default_major);
    }

    ResolvedVersion {
        requested: requested.to_string(),
        major: default_major.to_string(),
        fell_back: true,
    }
}

/// A configured package, or the reason its entry could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEntry {
    Valid(PackageSpec),
    Invalid {
        id: String,
        kind: PackageKind,
        reason: String,
    },
}

impl PackageEntry {
    pub fn id(&self) -> &str {
        match self {
            PackageEntry::Valid(spec) => &spec.id,
            PackageEntry::Invalid { id, .. } => id,
        }
    }

    pub fn kind(&self) -> PackageKind {
        match self {
            PackageEntry::Valid(spec) => spec.kind,
            PackageEntry::Invalid { kind, .. } => *kind,
        }
    }
}

/// Result of configuration resolution, passed explicitly to the installer
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub version: ResolvedVersion,
    pub version_config: VersionConfig,
    /// Directory relative package paths are resolved against
    pub base_dir: PathBuf,
    /// Packages of every kind, in install order
    pub packages: Vec<PackageEntry>,
}

impl ResolvedConfig {
    /// Load the configuration file and resolve it for `requested`
    pub fn load(config_path: &Path, requested: &str, default_major: &str) -> Result<Self> {
        let document = ConfigDocument::load(config_path)?;
        let base_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self::resolve(&document, config_path, &base_dir, requested, default_major)
    }

    /// Resolve an already parsed document
    pub fn resolve(
        document: &ConfigDocument,
        config_path: &Path,
        base_dir: &Path,
        requested: &str,
        default_major: &str,
    ) -> Result<Self> {
        let versions = document.versions.as_ref().ok_or_else(|| RigError::NoVersionMap {
            path: config_path.to_path_buf(),
        })?;

        let version = resolve_version(requested, default_major);
        let version_config = versions
            .get(&version.major)
            .ok_or_else(|| RigError::VersionNotFound {
                version: version.major.clone(),
            })?
            .clone();

        if !version_config.supported {
            return Err(RigError::VersionUnsupported {
                version: version.major.clone(),
            });
        }

        log::debug!("Using configuration for version {}", version.major);

        let packages = PackageKind::ALL
            .iter()
            .flat_map(|kind| merge_kind(document, &version_config, *kind, base_dir))
            .collect();

        Ok(Self {
            version,
            version_config,
            base_dir: base_dir.to_path_buf(),
            packages,
        })
    }

    /// Configured packages of one kind, in configuration order
    pub fn packages_of(&self, kind: PackageKind) -> impl Iterator<Item = &PackageEntry> {
        self.packages.iter().filter(move |entry| entry.kind() == kind)
    }
}

/// Merge top-level entries with the version overrides of one kind.
///
/// Override keys win; ids only present in the override come last.
fn merge_kind(
    document: &ConfigDocument,
    version: &VersionConfig,
    kind: PackageKind,
    base_dir: &Path,
) -> Vec<PackageEntry> {
    let base = document.entries(kind);
    let overrides = version.install.entries(kind);

    let override_only = overrides.iter().filter(|(id, _)| !base.contains_key(*id));

    base.iter()
        .map(|(id, entry)| {
            let mut merged = entry.clone();
            if let Some(extra) = overrides.get(id) {
                for (key, value) in extra {
                    merged.insert(key.clone(), value.clone());
                }
            }
            (id, merged)
        })
        .chain(override_only.map(|(id, entry)| (id, entry.clone())))
        .map(|(id, merged)| to_entry(id, kind, merged, base_dir))
        .collect()
}

fn to_entry(id: &str, kind: PackageKind, merged: Map<String, serde_json::Value>, base_dir: &Path) -> PackageEntry {
    let source = serde_json::from_value::<RawSource>(serde_json::Value::Object(merged))
        .map_err(RigError::from)
        .and_then(|raw| SourceDescriptor::resolve(id, &raw, base_dir));

    match source {
        Ok(source) => PackageEntry::Valid(PackageSpec {
            id: id.to_string(),
            kind,
            source,
        }),
        Err(e) => PackageEntry::Invalid {
            id: id.to_string(),
            kind,
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn document(json: &str) -> ConfigDocument {
        serde_json::from_str(json).unwrap()
    }

    fn resolve(json: &str, requested: &str) -> Result<ResolvedConfig> {
        ResolvedConfig::resolve(&document(json), Path::new("rig.json"), Path::new("/cfg"), requested, "13")
    }

    #[test]
    fn test_resolve_version_numeric() {
        let version = resolve_version("13.307", "12");
        assert_eq!(version.major, "13");
        assert!(!version.fell_back);

        assert_eq!(resolve_version("14", "12").major, "14");
        assert_eq!(resolve_version("14.1.2", "12").major, "14");
    }

    #[test]
    fn test_resolve_version_fallback() {
        for requested in ["latest", "stable", "LATEST", "13.x", "1.2.3.4", "", "v13"] {
            let version = resolve_version(requested, "12");
            assert_eq!(version.major, "12", "{}", requested);
            assert!(version.fell_back);
        }
    }

    #[test]
    fn test_missing_version_map() {
        let err = resolve(r#"{ "engines": {} }"#, "13").unwrap_err();
        assert!(matches!(err, RigError::NoVersionMap { .. }));
    }

    #[test]
    fn test_version_absent_and_unsupported() {
        let json = r#"{ "versions": { "12": { "supported": false } } }"#;

        let err = resolve(json, "14").unwrap_err();
        assert!(matches!(err, RigError::VersionNotFound { ref version } if version == "14"));

        let err = resolve(json, "12.5").unwrap_err();
        assert!(matches!(err, RigError::VersionUnsupported { ref version } if version == "12"));
    }

    #[test]
    fn test_latest_uses_default_major() {
        let resolved = resolve(r#"{ "versions": { "13": {} } }"#, "latest").unwrap();
        assert_eq!(resolved.version.major, "13");
        assert!(resolved.packages.is_empty());
    }

    #[test]
    fn test_override_merges_over_top_level() {
        let json = r#"{
            "engines": {
                "core": { "manifest": "https://example.org/core.json" },
                "physics": { "path": "https://example.org/physics.zip" }
            },
            "versions": {
                "13": {
                    "install": {
                        "engines": {
                            "core": { "manifest": "https://example.org/core-13.json" },
                            "audio": { "path": "https://example.org/audio.tgz" }
                        }
                    }
                }
            }
        }"#;
        let resolved = resolve(json, "13").unwrap();
        let engines: Vec<_> = resolved.packages_of(PackageKind::Engine).cloned().collect();

        assert_eq!(
            engines,
            vec![
                PackageEntry::Valid(PackageSpec {
                    id: "core".into(),
                    kind: PackageKind::Engine,
                    source: SourceDescriptor::ManifestUrl("https://example.org/core-13.json".into()),
                }),
                PackageEntry::Valid(PackageSpec {
                    id: "physics".into(),
                    kind: PackageKind::Engine,
                    source: SourceDescriptor::DirectUrl("https://example.org/physics.zip".into()),
                }),
                PackageEntry::Valid(PackageSpec {
                    id: "audio".into(),
                    kind: PackageKind::Engine,
                    source: SourceDescriptor::DirectUrl("https://example.org/audio.tgz".into()),
                }),
            ]
        );
    }

    #[test]
    fn test_override_path_keeps_top_level_manifest() {
        // The override adds a path but the inherited manifest still wins
        let json = r#"{
            "extensions": { "ui": { "manifest": "https://example.org/ui.json" } },
            "versions": { "13": { "install": { "extensions": { "ui": { "path": "./ui" } } } } }
        }"#;
        let resolved = resolve(json, "13").unwrap();
        let entry = resolved.packages_of(PackageKind::Extension).next().unwrap();

        assert!(matches!(
            entry,
            PackageEntry::Valid(PackageSpec { source: SourceDescriptor::ManifestUrl(_), .. })
        ));
    }

    #[test]
    fn test_entry_without_source_is_invalid() {
        let json = r#"{ "scenarios": { "empty": {} }, "versions": { "13": {} } }"#;
        let resolved = resolve(json, "13").unwrap();
        let entry = &resolved.packages[0];

        assert_eq!(entry.id(), "empty");
        assert_eq!(entry.kind(), PackageKind::Scenario);
        assert!(matches!(entry, PackageEntry::Invalid { .. }));
    }

    #[test]
    fn test_kind_order() {
        let json = r#"{
            "scenarios": { "s": { "path": "https://example.org/s.zip" } },
            "engines": { "e": { "path": "https://example.org/e.zip" } },
            "extensions": { "x": { "path": "https://example.org/x.zip" } },
            "versions": { "13": {} }
        }"#;
        let resolved = resolve(json, "13").unwrap();
        let ids: Vec<_> = resolved.packages.iter().map(PackageEntry::id).collect();
        assert_eq!(ids, ["e", "x", "s"]);
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sys1")).unwrap();
        let config_path = temp.path().join("rig.json");
        fs::write(
            &config_path,
            r#"{ "scenarios": { "sys1": { "path": "sys1" } }, "versions": { "13": {} } }"#,
        )
        .unwrap();

        let resolved = ResolvedConfig::load(&config_path, "13.307", "12").unwrap();
        assert_eq!(
            resolved.packages[0],
            PackageEntry::Valid(PackageSpec {
                id: "sys1".into(),
                kind: PackageKind::Scenario,
                source: SourceDescriptor::LocalDirectory(temp.path().join("sys1")),
            })
        );
    }
}
