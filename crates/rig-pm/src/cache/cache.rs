use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

fn sanitize_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new("[^a-z0-9._]").unwrap())
}

/// Flat filesystem cache keyed by sanitized strings
pub struct Cache {
    /// Root directory of the cache
    root: PathBuf,
}

impl Cache {
    /// Create a new cache instance
    ///
    /// # Example
    /// ```no_run
    /// use std::path::PathBuf;
    /// use rig_pm::cache::Cache;
    ///
    /// let cache = Cache::new(PathBuf::from("/tmp/rig-cache/files"));
    /// ```
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root directory of the cache
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitize a cache key to ensure it's safe for filesystem use
    #[inline]
    pub fn sanitize_key(key: &str) -> String {
        sanitize_regex()
            .replace_all(&key.to_lowercase(), "-")
            .into_owned()
    }

    /// Get the full path for a cache key
    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(Self::sanitize_key(key))
    }

    /// Path used while a cache file is being written
    pub fn partial_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.part", Self::sanitize_key(key)))
    }

    /// Read data from cache
    ///
    /// # Returns
    /// * `Ok(Some(data))` - Data was found and read successfully
    /// * `Ok(None)` - Key doesn't exist
    /// * `Err(e)` - IO error occurred
    pub fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write data to cache through a temporary file and a rename
    pub fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;

        let partial = self.partial_path(key);
        fs::write(&partial, data)?;
        self.publish(key)
    }

    /// Move the partial file for `key` over its final path
    pub fn publish(&self, key: &str) -> io::Result<()> {
        fs::rename(self.partial_path(key), self.path(key))
    }

    /// Clear the entire cache
    ///
    /// Removes all files and directories under the cache root
    pub fn clear(&self) -> io::Result<()> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let path = entry?.path();

            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }

        Ok(())
    }

    /// Total size in bytes of all cached files
    pub fn size(&self) -> u64 {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_write_read() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path().join("files"));

        cache.write("test.txt", b"Hello, World!").unwrap();
        assert!(cache.path("test.txt").is_file());
        assert!(!cache.partial_path("test.txt").exists());

        let data = cache.read("test.txt").unwrap();
        assert_eq!(data, Some(b"Hello, World!".to_vec()));
    }

    #[test]
    fn test_cache_read_missing() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path().to_path_buf());

        assert_eq!(cache.read("missing").unwrap(), None);
    }

    #[test]
    fn test_cache_sanitize_key() {
        assert_eq!(Cache::sanitize_key("Engine/Core 1.2.tar.gz"), "engine-core-1.2.tar.gz");
        assert_eq!(Cache::sanitize_key("a:b?c=d"), "a-b-c-d");
    }

    #[test]
    fn test_cache_clear_and_size() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path().join("files"));

        // Clearing a cache that was never written is fine
        cache.clear().unwrap();

        cache.write("one", b"Hello").unwrap();
        cache.write("two", b"World!").unwrap();
        assert_eq!(cache.size(), 11);

        cache.clear().unwrap();
        assert_eq!(cache.read("one").unwrap(), None);
        assert_eq!(cache.size(), 0);
    }
}
