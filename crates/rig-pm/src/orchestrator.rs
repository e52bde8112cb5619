//! Drives a whole run: resolve the configuration, install every package
//! kind by kind, then purge what is no longer configured.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::archive::{ArchiveExtractor, ArchiveType};
use crate::cache::FetchCache;
use crate::change::ChangeDetector;
use crate::config::{InstallConfig, PackageEntry, ResolvedConfig};
use crate::http::HttpClient;
use crate::installer::AtomicInstaller;
use crate::manifest::resolve_download_url;
use crate::package::{InstallOutcome, InstallStatus, PackageKind, PackageSpec, SourceDescriptor};
use crate::reconcile::Reconciler;
use crate::{Result, RigError};

/// Outcomes of one run, in processing order
#[derive(Debug, Clone, Default)]
pub struct InstallSummary {
    /// Major version the run installed for
    pub version: String,
    pub outcomes: Vec<InstallOutcome>,
    /// Directories removed by the purge (or that would be, in dry-run)
    pub purged: Vec<PathBuf>,
}

impl InstallSummary {
    fn count(&self, status: InstallStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn installed(&self) -> usize {
        self.count(InstallStatus::Installed)
    }

    pub fn skipped(&self) -> usize {
        self.count(InstallStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(InstallStatus::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &InstallOutcome> {
        self.outcomes.iter().filter(|o| !o.success())
    }

    /// Outcome of a package, if it was processed
    pub fn outcome(&self, kind: PackageKind, package_id: &str) -> Option<&InstallOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.kind == kind && o.package_id == package_id)
    }
}

pub struct Orchestrator {
    config: InstallConfig,
    fetch_cache: FetchCache,
    installer: AtomicInstaller,
    detector: ChangeDetector,
    reconciler: Reconciler,
}

impl Orchestrator {
    pub fn new(config: InstallConfig) -> Result<Self> {
        let http = Arc::new(HttpClient::with_config(config.http.clone())?);
        let fetch_cache = FetchCache::new(http, &config.cache_dir, config.cache_mode);

        let extractor = ArchiveExtractor::new().with_builtin_only(config.builtin_extractor);
        let installer = AtomicInstaller::new(extractor, config.scratch_dir())
            .with_dry_run(config.dry_run)
            .with_external_copy(!config.builtin_extractor);

        let detector = ChangeDetector::open(config.signature_store());
        let reconciler = Reconciler::new().with_dry_run(config.dry_run);

        Ok(Self {
            config,
            fetch_cache,
            installer,
            detector,
            reconciler,
        })
    }

    pub fn fetch_cache(&self) -> &FetchCache {
        &self.fetch_cache
    }

    /// Load the configuration file and install everything it lists.
    ///
    /// Only configuration errors are returned; package failures end up in
    /// the summary.
    pub async fn run(&self) -> Result<InstallSummary> {
        let resolved = ResolvedConfig::load(
            &self.config.config_path,
            &self.config.version,
            &self.config.default_major,
        )?;
        log::info!(
            "Installing packages for version {} (requested {})",
            resolved.version.major,
            resolved.version.requested
        );

        Ok(self.install_resolved(&resolved).await)
    }

    /// Install every package of a resolved configuration, purging each kind
    /// once its packages are done.
    pub async fn install_resolved(&self, resolved: &ResolvedConfig) -> InstallSummary {
        let mut summary = InstallSummary {
            version: resolved.version.major.clone(),
            ..Default::default()
        };

        for kind in PackageKind::ALL {
            // Failed ids stay in the keep-set so a broken update never purges
            // the previous install.
            let mut keep = HashSet::new();

            for entry in resolved.packages_of(kind) {
                keep.insert(entry.id().to_string());

                let outcome = match entry {
                    PackageEntry::Valid(spec) => self.install_package(spec).await,
                    PackageEntry::Invalid { id, kind, reason } => {
                        log::warn!("Skipping {} {}: {}", kind, id, reason);
                        InstallOutcome::failed(id.as_str(), *kind, reason)
                    }
                };
                summary.outcomes.push(outcome);
            }

            let root = self.kind_root(kind);
            match self.reconciler.purge(&root, &keep) {
                Ok(purged) => summary.purged.extend(purged),
                Err(e) => log::warn!("Failed to purge {}: {}", root.display(), e),
            }
        }

        summary
    }

    /// Install a single package; errors become a failed outcome
    pub async fn install_package(&self, spec: &PackageSpec) -> InstallOutcome {
        match self.install_source(spec).await {
            Ok(status) => {
                match status {
                    InstallStatus::Installed => log::info!("Installed {} {}", spec.kind, spec.id),
                    InstallStatus::Skipped => log::info!("{} {} is up to date", spec.kind, spec.id),
                    InstallStatus::Failed => {}
                }
                InstallOutcome::new(spec.id.as_str(), spec.kind, status)
            }
            Err(e) => {
                log::warn!("Failed to install {} {}: {}", spec.kind, spec.id, e);
                InstallOutcome::failed(spec.id.as_str(), spec.kind, e)
            }
        }
    }

    /// Root directory of one package kind
    pub fn kind_root(&self, kind: PackageKind) -> PathBuf {
        self.config.install_root.join(kind.key())
    }

    /// Destination directory of a package; the id must be a plain name
    pub fn destination(&self, kind: PackageKind, package_id: &str) -> Result<PathBuf> {
        let mut components = Path::new(package_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.kind_root(kind).join(package_id)),
            _ => Err(RigError::InvalidSource {
                package: package_id.to_string(),
                reason: "package id is not a plain directory name".to_string(),
            }),
        }
    }

    async fn install_source(&self, spec: &PackageSpec) -> Result<InstallStatus> {
        let dest = self.destination(spec.kind, &spec.id)?;

        match &spec.source {
            SourceDescriptor::ManifestUrl(url) => {
                let bytes = self.read_manifest(url).await?;
                let document: Value = serde_json::from_slice(&bytes)?;

                let download = resolve_download_url(&document, url)
                    .ok_or_else(|| RigError::ManifestResolution { url: url.clone() })?;
                log::debug!("Manifest {} points to {}", url, download);

                self.install_remote(spec, &download, &dest).await
            }
            SourceDescriptor::DirectUrl(url) => self.install_remote(spec, url, &dest).await,
            SourceDescriptor::LocalDirectory(path) => self.install_tracked(spec, path, None, &dest).await,
            SourceDescriptor::LocalArchive(path) => {
                if !path.is_file() {
                    return Err(RigError::InvalidSource {
                        package: spec.id.clone(),
                        reason: format!("{} does not exist", path.display()),
                    });
                }
                if ArchiveType::from_path(path).is_none() {
                    return Err(RigError::InvalidSource {
                        package: spec.id.clone(),
                        reason: format!("{} is not a recognized archive", path.display()),
                    });
                }
                self.install_tracked(spec, path, None, &dest).await
            }
        }
    }

    /// Manifest bytes; a dry run reads them without writing to the cache
    async fn read_manifest(&self, url: &str) -> Result<Vec<u8>> {
        if self.config.dry_run {
            return self.fetch_cache.fetch_in_memory(url).await;
        }

        let manifest = self.fetch_cache.fetch(url).await?;
        tokio::fs::read(&manifest.path)
            .await
            .map_err(|e| RigError::fs("Failed to read", &manifest.path, e))
    }

    /// Fetch a URL and install it when it names an archive.
    ///
    /// Anything else stays in the cache and counts as installed.
    async fn install_remote(&self, spec: &PackageSpec, url: &str, dest: &Path) -> Result<InstallStatus> {
        if self.config.dry_run {
            log::info!("[dry-run] Would fetch {} for {} into {}", url, spec.id, dest.display());
            return Ok(InstallStatus::Installed);
        }

        let fetched = self.fetch_cache.fetch(url).await?;

        if ArchiveType::from_name(url).is_none() {
            log::info!(
                "{} is not an archive, keeping it at {}",
                url,
                fetched.path.display()
            );
            return Ok(InstallStatus::Installed);
        }

        self.install_tracked(spec, &fetched.path, Some(url), dest).await
    }

    /// Install a directory or archive unless it is unchanged and already installed
    async fn install_tracked(
        &self,
        spec: &PackageSpec,
        source: &Path,
        name_hint: Option<&str>,
        dest: &Path,
    ) -> Result<InstallStatus> {
        let check = self.detector.check(source, dest);
        if !check.changed && dest.is_dir() {
            return Ok(InstallStatus::Skipped);
        }

        if source.is_dir() {
            self.installer.install_directory(&spec.id, source, dest).await?;
        } else {
            self.installer.install_archive(&spec.id, source, name_hint, dest).await?;
        }

        if !self.config.dry_run {
            if let Some(signature) = check.signature {
                if let Err(e) = self.detector.record(source, dest, signature) {
                    log::warn!("Could not record signature of {}: {}", source.display(), e);
                }
            }
        }

        Ok(InstallStatus::Installed)
    }
}
