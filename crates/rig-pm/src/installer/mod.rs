//! Package installation into destination directories.
//!
//! Content is always assembled in a staging directory beside the destination
//! and published with a rename, so a destination is either absent, the
//! previous install, or the complete new install.

mod atomic;
mod mirror;

pub use atomic::{unwrap_root, AtomicInstaller};
pub use mirror::{copy_contents, mirror_directory};
