//! On-disk caches: a flat key/value file store and the URL fetch cache built on it.

#[allow(clippy::module_inception)]
mod cache;
mod fetch_cache;

pub use cache::Cache;
pub use fetch_cache::{CacheEntry, CacheMode, FetchCache, FetchedFile};
