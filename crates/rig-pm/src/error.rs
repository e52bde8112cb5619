use std::path::PathBuf;

use thiserror::Error;

use crate::http::HttpError;

/// Exit code reported when the configuration file cannot be read or parsed.
pub const EXIT_CONFIG_UNREADABLE: i32 = 2;
/// Exit code reported when the configuration has no `versions` map.
pub const EXIT_NO_VERSION_MAP: i32 = 3;
/// Exit code reported when the requested version is absent from the version map.
pub const EXIT_VERSION_NOT_FOUND: i32 = 4;
/// Exit code reported when the requested version is marked unsupported.
pub const EXIT_VERSION_UNSUPPORTED: i32 = 5;

#[derive(Error, Debug)]
pub enum RigError {
    // Configuration errors (fatal for the whole run)
    #[error("Failed to read configuration {path}: {reason}")]
    ConfigUnreadable { path: PathBuf, reason: String },

    #[error("Configuration {path} has no versions map")]
    NoVersionMap { path: PathBuf },

    #[error("Version {version} is not listed in the configuration")]
    VersionNotFound { version: String },

    #[error("Version {version} is not supported")]
    VersionUnsupported { version: String },

    // Network errors
    #[error("Fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: HttpError,
    },

    // Manifest errors
    #[error("No download URL found in manifest {url}")]
    ManifestResolution { url: String },

    // Archive errors
    #[error("Extraction failed for {archive}: {reason}")]
    Extraction { archive: PathBuf, reason: String },

    // Filesystem errors
    #[error("{context} {path}: {source}")]
    Filesystem {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Source errors
    #[error("Invalid source for {package}: {reason}")]
    InvalidSource { package: String, reason: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RigError {
    /// Wrap an IO error with the operation and path it happened on.
    pub fn fs(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RigError::Filesystem {
            context,
            path: path.into(),
            source,
        }
    }

    pub fn extraction(archive: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RigError::Extraction {
            archive: archive.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error aborts the whole run instead of a single package.
    pub fn is_fatal(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Stable process exit code for fatal configuration errors.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RigError::ConfigUnreadable { .. } => Some(EXIT_CONFIG_UNREADABLE),
            RigError::NoVersionMap { .. } => Some(EXIT_NO_VERSION_MAP),
            RigError::VersionNotFound { .. } => Some(EXIT_VERSION_NOT_FOUND),
            RigError::VersionUnsupported { .. } => Some(EXIT_VERSION_UNSUPPORTED),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RigError>;
