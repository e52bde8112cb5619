//! Configuration handling: the package document, version resolution and
//! the settings of an installer run.

mod document;
mod install;
mod resolver;

pub use document::{ConfigDocument, EntryMap, VersionConfig, VersionInstall};
pub use install::{InstallConfig, CACHE_DIR_ENV, DEFAULT_CONFIG_FILE};
pub use resolver::{resolve_version, PackageEntry, ResolvedConfig, ResolvedVersion};
