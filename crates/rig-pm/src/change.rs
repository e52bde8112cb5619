//! Cheap change detection for local package sources.
//!
//! Files are identified by a SHA-256 of their content. Directories use an
//! aggregate of the names, sizes and modification times of their immediate
//! entries, which is much cheaper than hashing the tree and good enough to
//! decide whether a reinstall can be skipped. A missed change only costs an
//! unnecessary reinstall.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::util::ensure_dir;
use crate::{Result, RigError};

/// Recorded fingerprint of a source path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeSignature {
    File { hash: String },
    Directory { aggregate: String },
}

impl ChangeSignature {
    /// Compute the signature of a file or directory
    pub fn compute(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        if metadata.is_dir() {
            Ok(ChangeSignature::Directory {
                aggregate: directory_aggregate(path)?,
            })
        } else {
            Ok(ChangeSignature::File {
                hash: file_hash(path)?,
            })
        }
    }
}

/// Outcome of comparing a path against its recorded signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCheck {
    pub changed: bool,
    /// The freshly computed signature; `None` when it could not be computed
    pub signature: Option<ChangeSignature>,
}

/// Persistent store of signatures keyed by source path and install target.
///
/// One source may feed several packages; each destination keeps its own
/// signature so updating one never hides the change from the others.
pub struct ChangeDetector {
    store_path: PathBuf,
    signatures: Mutex<BTreeMap<String, ChangeSignature>>,
}

impl ChangeDetector {
    /// Open the signature store at `store_path`; an unreadable store starts empty
    pub fn open(store_path: impl Into<PathBuf>) -> Self {
        let store_path = store_path.into();
        let signatures = match fs::read(&store_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt signature store {}: {}", store_path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!("Could not read signature store {}: {}", store_path.display(), e);
                BTreeMap::new()
            }
        };

        Self {
            store_path,
            signatures: Mutex::new(signatures),
        }
    }

    fn key(path: &Path, target: &Path) -> String {
        let source = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        format!("{} -> {}", source.display(), target.display())
    }

    /// Compare `path` against the signature last recorded for `target`
    /// without recording.
    ///
    /// Errors are treated as a change so callers fall back to reinstalling.
    pub fn check(&self, path: &Path, target: &Path) -> ChangeCheck {
        let signature = match ChangeSignature::compute(path) {
            Ok(signature) => signature,
            Err(e) => {
                log::debug!("Could not fingerprint {}: {}", path.display(), e);
                return ChangeCheck {
                    changed: true,
                    signature: None,
                };
            }
        };

        let signatures = self.signatures.lock().unwrap_or_else(|e| e.into_inner());
        let changed = signatures.get(&Self::key(path, target)) != Some(&signature);

        ChangeCheck {
            changed,
            signature: Some(signature),
        }
    }

    /// Record `signature` as the state of `path` installed into `target` and
    /// persist the store
    pub fn record(&self, path: &Path, target: &Path, signature: ChangeSignature) -> Result<()> {
        let mut signatures = self.signatures.lock().unwrap_or_else(|e| e.into_inner());
        signatures.insert(Self::key(path, target), signature);

        if let Some(parent) = self.store_path.parent() {
            ensure_dir(parent).map_err(|e| RigError::fs("Failed to create directory", parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(&*signatures)?;
        let partial = self.store_path.with_extension("json.part");
        fs::write(&partial, bytes).map_err(|e| RigError::fs("Failed to write", &partial, e))?;
        fs::rename(&partial, &self.store_path)
            .map_err(|e| RigError::fs("Failed to write", &self.store_path, e))
    }

    /// Whether `path` changed for `target` since the last call; a change is
    /// recorded immediately.
    pub fn has_changed(&self, path: &Path, target: &Path) -> bool {
        let check = self.check(path, target);
        if let (true, Some(signature)) = (check.changed, check.signature) {
            if let Err(e) = self.record(path, target, signature) {
                log::warn!("{}", e);
            }
        }
        check.changed
    }
}

fn file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn directory_aggregate(path: &Path) -> io::Result<String> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        entries.push(format!(
            "{}:{}:{}",
            entry.file_name().to_string_lossy(),
            metadata.len(),
            mtime
        ));
    }
    entries.sort();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{}:{:x}", entries.len(), hasher.finalize()))
}
