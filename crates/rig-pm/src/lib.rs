pub mod archive;
pub mod cache;
pub mod change;
pub mod config;
pub mod error;
pub mod http;
pub mod installer;
pub mod manifest;
pub mod orchestrator;
pub mod package;
pub mod reconcile;
pub mod util;

pub use error::{Result, RigError};
pub use archive::{ArchiveExtractor, ArchiveType};
pub use cache::{CacheEntry, CacheMode, FetchCache, FetchedFile};
pub use change::{ChangeDetector, ChangeSignature};
pub use config::{InstallConfig, PackageEntry, ResolvedConfig, ResolvedVersion};
pub use http::{HttpClient, HttpClientConfig, HttpError};
pub use installer::AtomicInstaller;
pub use orchestrator::{InstallSummary, Orchestrator};
pub use package::{InstallOutcome, InstallStatus, PackageKind, PackageSpec, SourceDescriptor};
pub use reconcile::{Reconciler, PRESERVED_NAMES};
