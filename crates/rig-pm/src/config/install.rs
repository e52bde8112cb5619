use std::env;
use std::path::PathBuf;

use crate::cache::CacheMode;
use crate::http::HttpClientConfig;

/// Environment variable overriding the default cache directory
pub const CACHE_DIR_ENV: &str = "RIG_CACHE_DIR";

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "rig.json";

/// Everything one installer run needs to know
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Configuration document listing packages and versions
    pub config_path: PathBuf,
    /// Root holding the `engines`, `extensions` and `scenarios` directories
    pub install_root: PathBuf,
    /// Download cache, signature store and extraction scratch area
    pub cache_dir: PathBuf,
    /// Requested version (`latest`, `stable` or a dotted number)
    pub version: String,
    /// Major version used when the requested one cannot be parsed
    pub default_major: String,
    /// Resolve and fetch, but never write to the install root
    pub dry_run: bool,
    /// Force the in-process tar decoder and directory copy
    pub builtin_extractor: bool,
    pub cache_mode: CacheMode,
    pub http: HttpClientConfig,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            install_root: PathBuf::from("."),
            cache_dir: Self::default_cache_dir(),
            version: "latest".to_string(),
            default_major: "1".to_string(),
            dry_run: false,
            builtin_extractor: false,
            cache_mode: CacheMode::default(),
            http: HttpClientConfig::default(),
        }
    }
}

impl InstallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// `RIG_CACHE_DIR`, then the platform cache directory, then `.rig-cache`
    pub fn default_cache_dir() -> PathBuf {
        if let Some(dir) = env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }

        directories::ProjectDirs::from("", "", "rig")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".rig-cache"))
    }

    /// Path of the change signature store
    pub fn signature_store(&self) -> PathBuf {
        self.cache_dir.join("signatures.json")
    }

    /// Scratch area for archive extraction
    pub fn scratch_dir(&self) -> PathBuf {
        self.cache_dir.join("tmp")
    }

    pub fn with_config_path(mut self, config_path: impl Into<PathBuf>) -> Self {
        self.config_path = config_path.into();
        self
    }

    pub fn with_install_root(mut self, install_root: impl Into<PathBuf>) -> Self {
        self.install_root = install_root.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_default_major(mut self, default_major: impl Into<String>) -> Self {
        self.default_major = default_major.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_builtin_extractor(mut self, builtin_extractor: bool) -> Self {
        self.builtin_extractor = builtin_extractor;
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn with_http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }
}
