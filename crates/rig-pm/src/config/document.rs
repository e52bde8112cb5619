use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::package::PackageKind;
use crate::{Result, RigError};

/// Per-id configuration entries of one kind, in file order
pub type EntryMap = IndexMap<String, Map<String, Value>>;

/// Per-version install overrides
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VersionInstall {
    #[serde(default)]
    pub engines: EntryMap,
    #[serde(default)]
    pub extensions: EntryMap,
    #[serde(default)]
    pub scenarios: EntryMap,
}

impl VersionInstall {
    pub fn entries(&self, kind: PackageKind) -> &EntryMap {
        match kind {
            PackageKind::Engine => &self.engines,
            PackageKind::Extension => &self.extensions,
            PackageKind::Scenario => &self.scenarios,
        }
    }
}

/// One entry of the `versions` map
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VersionConfig {
    #[serde(default = "default_supported")]
    pub supported: bool,
    #[serde(default)]
    pub install: VersionInstall,
}

fn default_supported() -> bool {
    true
}

/// The installer configuration file
///
/// ```json
/// {
///   "engines": { "core": { "manifest": "https://example.org/core.json" } },
///   "scenarios": { "sys1": { "path": "./scenarios/sys1" } },
///   "versions": {
///     "13": { "supported": true, "install": { "engines": { "core": { "path": "./core" } } } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub engines: EntryMap,
    #[serde(default)]
    pub extensions: EntryMap,
    #[serde(default)]
    pub scenarios: EntryMap,
    #[serde(default)]
    pub versions: Option<IndexMap<String, VersionConfig>>,
}

impl ConfigDocument {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let unreadable = |reason: String| RigError::ConfigUnreadable {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))
    }

    pub fn entries(&self, kind: PackageKind) -> &EntryMap {
        match kind {
            PackageKind::Engine => &self.engines,
            PackageKind::Extension => &self.extensions,
            PackageKind::Scenario => &self.scenarios,
        }
    }
}
