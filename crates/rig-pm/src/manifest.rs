//! Download URL discovery in package manifests.
//!
//! Manifests come in several shapes. Each known shape is a pure rule that
//! returns the candidate URLs it finds; rules are tried in a fixed order and
//! the first candidate with a known archive suffix wins, falling back to the
//! first candidate overall.

use serde_json::Value;
use url::Url;

use crate::archive::ArchiveType;

type Rule = fn(&Value) -> Vec<String>;

/// Extraction rules, in priority order
const RULES: &[(&str, Rule)] = &[
    ("top-level", top_level as Rule),
    ("manifest", nested_manifest as Rule),
    ("releases", releases as Rule),
    ("packages", packages as Rule),
    ("compatibility", compatibility as Rule),
    ("file", file as Rule),
];

/// A URL from a string, or from the `download`/`url`/`file` key of an object
fn link(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => ["download", "url", "file"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(link),
        _ => None,
    }
}

fn links_in_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(link).collect())
        .unwrap_or_default()
}

fn top_level(manifest: &Value) -> Vec<String> {
    ["download", "url"]
        .iter()
        .filter_map(|key| manifest.get(*key))
        .filter_map(link)
        .collect()
}

fn nested_manifest(manifest: &Value) -> Vec<String> {
    manifest
        .get("manifest")
        .filter(|v| v.is_object())
        .map(top_level)
        .unwrap_or_default()
}

fn releases(manifest: &Value) -> Vec<String> {
    links_in_array(manifest.get("releases"))
}

fn packages(manifest: &Value) -> Vec<String> {
    links_in_array(manifest.get("packages"))
}

fn compatibility(manifest: &Value) -> Vec<String> {
    match manifest.get("compatibility") {
        Some(Value::Array(items)) => items.iter().filter_map(link).collect(),
        Some(Value::Object(map)) => map.values().filter_map(link).collect(),
        _ => Vec::new(),
    }
}

fn file(manifest: &Value) -> Vec<String> {
    manifest.get("file").and_then(link).into_iter().collect()
}

/// All candidate download URLs in rule order
pub fn candidates(manifest: &Value) -> Vec<String> {
    RULES
        .iter()
        .flat_map(|(name, rule)| {
            let found = rule(manifest);
            if !found.is_empty() {
                log::trace!("Manifest rule {} found {:?}", name, found);
            }
            found
        })
        .collect()
}

/// Pick the download URL of a manifest fetched from `manifest_url`.
///
/// Relative URLs are resolved against the manifest location.
pub fn resolve_download_url(manifest: &Value, manifest_url: &str) -> Option<String> {
    let candidates = candidates(manifest);
    let chosen = candidates
        .iter()
        .find(|c| ArchiveType::from_name(c).is_some())
        .or_else(|| candidates.first())?;

    match Url::parse(chosen) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Url::parse(manifest_url)
            .and_then(|base| base.join(chosen))
            .map(|url| url.to_string())
            .ok()
            .or_else(|| Some(chosen.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "https://mods.example.org/engines/core/manifest.json";

    #[test]
    fn test_top_level_download() {
        let manifest = json!({ "name": "core", "download": "https://cdn.example.org/core.zip" });
        assert_eq!(
            resolve_download_url(&manifest, BASE).as_deref(),
            Some("https://cdn.example.org/core.zip")
        );
    }

    #[test]
    fn test_prefers_archive_suffix() {
        let manifest = json!({
            "url": "https://example.org/core",
            "releases": [{ "url": "https://example.org/core-2.tar.gz" }]
        });
        assert_eq!(
            resolve_download_url(&manifest, BASE).as_deref(),
            Some("https://example.org/core-2.tar.gz")
        );
    }

    #[test]
    fn test_falls_back_to_first_candidate() {
        let manifest = json!({ "url": "https://example.org/get?id=7" });
        assert_eq!(
            resolve_download_url(&manifest, BASE).as_deref(),
            Some("https://example.org/get?id=7")
        );
    }

    #[test]
    fn test_nested_manifest() {
        let manifest = json!({ "manifest": { "download": { "url": "https://example.org/n.tgz" } } });
        assert_eq!(resolve_download_url(&manifest, BASE).as_deref(), Some("https://example.org/n.tgz"));
    }

    #[test]
    fn test_packages_and_compatibility() {
        let manifest = json!({ "packages": ["https://example.org/p.tar"] });
        assert_eq!(candidates(&manifest), vec!["https://example.org/p.tar"]);

        let manifest = json!({ "compatibility": { "13": { "download": "https://example.org/c13.zip" } } });
        assert_eq!(candidates(&manifest), vec!["https://example.org/c13.zip"]);

        let manifest = json!({ "compatibility": [{ "file": "https://example.org/c.zip" }] });
        assert_eq!(candidates(&manifest), vec!["https://example.org/c.zip"]);
    }

    #[test]
    fn test_rule_order() {
        let manifest = json!({
            "file": "https://example.org/f.zip",
            "releases": [{ "download": "https://example.org/r.zip" }],
            "download": "https://example.org/d.zip"
        });
        assert_eq!(
            candidates(&manifest),
            vec!["https://example.org/d.zip", "https://example.org/r.zip", "https://example.org/f.zip"]
        );
    }

    #[test]
    fn test_relative_url_is_resolved() {
        let manifest = json!({ "file": { "url": "dist/core-1.0.zip" } });
        assert_eq!(
            resolve_download_url(&manifest, BASE).as_deref(),
            Some("https://mods.example.org/engines/core/dist/core-1.0.zip")
        );
    }

    #[test]
    fn test_no_candidates() {
        let manifest = json!({ "name": "core", "releases": [], "manifest": "https://example.org/m.json" });
        assert_eq!(resolve_download_url(&manifest, BASE), None);
        assert_eq!(resolve_download_url(&json!([1, 2]), BASE), None);
    }
}
