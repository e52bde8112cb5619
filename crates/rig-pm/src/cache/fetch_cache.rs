//! URL-keyed download cache with HTTP revalidation.
//!
//! Every fetched URL owns two files under `<cache_dir>/files`:
//! - `<key>` - the response body
//! - `<key>.meta.json` - the [`CacheEntry`] (validators, size, fetch time)
//!
//! The key is derived from a hash of the URL followed by its sanitized last
//! path segment, so archive suffixes survive and the layout is stable across
//! runs.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Cache;
use crate::http::{HttpClient, HttpError, Validators};
use crate::{Result, RigError};

/// How the fetch cache treats stored validators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Send stored validators and reuse the body on 304
    #[default]
    Revalidate,
    /// Never send validators; always download
    Bust,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "revalidate" => Ok(CacheMode::Revalidate),
            "bust" => Ok(CacheMode::Bust),
            other => Err(format!("unknown cache mode '{}' (expected revalidate or bust)", other)),
        }
    }
}

/// Sidecar record describing one cached URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn validators(&self) -> Validators {
        Validators {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchedFile {
    /// Local path of the cached body
    pub path: PathBuf,
    /// Whether the body was reused after a 304
    pub from_cache: bool,
    pub entry: CacheEntry,
}

pub struct FetchCache {
    http: Arc<HttpClient>,
    cache: Cache,
    mode: CacheMode,
}

impl FetchCache {
    pub fn new(http: Arc<HttpClient>, cache_dir: &Path, mode: CacheMode) -> Self {
        Self {
            http,
            cache: Cache::new(cache_dir.join("files")),
            mode,
        }
    }

    /// Deterministic cache key for a URL
    pub fn key_for(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        let hash: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();

        let name = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && !s.contains(':'))
            .unwrap_or("download");

        format!("{}-{}", hash, Cache::sanitize_key(name))
    }

    fn meta_key(key: &str) -> String {
        format!("{}.meta.json", key)
    }

    /// Path the body of `url` is (or would be) cached at
    pub fn body_path(&self, url: &str) -> PathBuf {
        self.cache.path(&Self::key_for(url))
    }

    /// Read the stored entry for a URL, if any
    pub fn entry(&self, url: &str) -> Result<Option<CacheEntry>> {
        let key = Self::key_for(url);
        let Some(bytes) = self.cache.read(&Self::meta_key(&key))? else {
            return Ok(None);
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.url == url => Ok(Some(entry)),
            Ok(_) => Ok(None),
            Err(e) => {
                log::debug!("Ignoring unreadable cache metadata for {}: {}", url, e);
                Ok(None)
            }
        }
    }

    fn write_entry(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        self.cache
            .write(&Self::meta_key(key), &bytes)
            .map_err(|e| RigError::fs("Failed to write cache metadata", self.cache.path(key), e))
    }

    /// Fetch a URL through the cache.
    ///
    /// In [`CacheMode::Revalidate`] a known URL is requested conditionally and a
    /// 304 answer reuses the cached body without rewriting it.
    pub async fn fetch(&self, url: &str) -> Result<FetchedFile> {
        let key = Self::key_for(url);
        let body_path = self.cache.path(&key);

        let previous = match self.mode {
            CacheMode::Revalidate => self.entry(url)?.filter(|_| body_path.is_file()),
            CacheMode::Bust => None,
        };
        let validators = previous.as_ref().map(CacheEntry::validators).unwrap_or_default();

        if validators.is_empty() {
            log::debug!("Fetching {}", url);
        } else {
            log::debug!("Revalidating {}", url);
        }

        let partial = self.cache.partial_path(&key);
        let download = self
            .http
            .download(url, &validators, &partial)
            .await
            .map_err(|source| RigError::Fetch { url: url.to_string(), source })?;

        match (download, previous) {
            (None, Some(mut entry)) => {
                log::debug!("Not modified: {}", url);
                entry.fetched_at = Utc::now();
                self.write_entry(&key, &entry)?;
                Ok(FetchedFile {
                    path: body_path,
                    from_cache: true,
                    entry,
                })
            }
            (None, None) => Err(Self::unexpected_not_modified(url)),
            (Some(download), _) => {
                self.cache
                    .publish(&key)
                    .map_err(|e| RigError::fs("Failed to store download", &body_path, e))?;

                let entry = CacheEntry {
                    url: url.to_string(),
                    etag: download.validators.etag,
                    last_modified: download.validators.last_modified,
                    local_path: body_path.clone(),
                    size_bytes: download.size,
                    fetched_at: Utc::now(),
                };
                self.write_entry(&key, &entry)?;
                log::debug!("Cached {} ({} bytes)", url, download.size);

                Ok(FetchedFile {
                    path: body_path,
                    from_cache: false,
                    entry,
                })
            }
        }
    }

    /// Fetch a URL into memory without touching the cache directory.
    ///
    /// Stored validators are still sent, and a 304 answer returns the cached
    /// body. Used by dry runs, which must not write anything.
    pub async fn fetch_in_memory(&self, url: &str) -> Result<Vec<u8>> {
        let key = Self::key_for(url);
        let cached = match self.mode {
            CacheMode::Revalidate => match self.entry(url)? {
                Some(entry) => self.cache.read(&key)?.map(|body| (entry, body)),
                None => None,
            },
            CacheMode::Bust => None,
        };
        let validators = cached
            .as_ref()
            .map(|(entry, _)| entry.validators())
            .unwrap_or_default();

        log::debug!("Fetching {} into memory", url);
        let body = self
            .http
            .fetch_bytes(url, &validators)
            .await
            .map_err(|source| RigError::Fetch { url: url.to_string(), source })?;

        match (body, cached) {
            (Some(body), _) => Ok(body),
            (None, Some((_, body))) => Ok(body),
            (None, None) => Err(Self::unexpected_not_modified(url)),
        }
    }

    fn unexpected_not_modified(url: &str) -> RigError {
        RigError::Fetch {
            url: url.to_string(),
            source: HttpError::HttpStatus {
                status: 304,
                url: url.to_string(),
            },
        }
    }

    /// Remove every cached body and sidecar
    pub fn clear(&self) -> Result<()> {
        self.cache
            .clear()
            .map_err(|e| RigError::fs("Failed to clear cache", self.cache.root(), e))
    }

    /// Total size of the cached files in bytes
    pub fn size(&self) -> u64 {
        self.cache.size()
    }
}
