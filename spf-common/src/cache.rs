// spf-common/src/cache.rs
// Byte-blob disk cache that degrades to a miss/no-op when the cache directory
// can't be used.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha224};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Number of leading digest characters turned into nested directories.
const FANOUT_DEPTH: usize = 5;

/// Disk cache keyed by string. Every filesystem failure is swallowed: `get`
/// reports a miss, `set` and `delete` do nothing.
#[derive(Debug, Clone)]
pub struct PermissionSafeCache {
    directory: Option<PathBuf>,
}

impl PermissionSafeCache {
    /// Create a cache rooted at `directory`. The root does not need to exist
    /// yet. If it (or its nearest existing parent) belongs to another user the
    /// cache is disabled.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        if !check_path_owner(&directory) {
            warn!(
                "The directory '{}' or its parent directory is not owned by the current user and the cache has been disabled. Check the permissions and owner of that directory.",
                directory.display()
            );
            return Self::disabled();
        }
        Self {
            directory: Some(directory),
        }
    }

    pub fn disabled() -> Self {
        Self { directory: None }
    }

    /// Gets the cache directory path, if caching is enabled.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    fn cache_path(&self, key: &str) -> Option<PathBuf> {
        let root = self.directory.as_ref()?;
        let hashed = hex::encode(Sha224::digest(key.as_bytes()));
        let mut path = root.clone();
        for c in hashed.chars().take(FANOUT_DEPTH) {
            path.push(c.to_string());
        }
        path.push(&hashed);
        Some(path)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.cache_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("Cache hit for '{}' at {}", key, path.display());
                Some(bytes)
            }
            Err(e) => {
                debug!("Cache miss for '{}' ({}): {}", key, path.display(), e);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &[u8]) {
        let Some(path) = self.cache_path(key) else {
            return;
        };
        if let Err(e) = write_atomically(&path, value) {
            debug!(
                "Could not store cache entry for '{}' at {}: {}",
                key,
                path.display(),
                e
            );
        }
    }

    pub fn delete(&self, key: &str) {
        let Some(path) = self.cache_path(key) else {
            return;
        };
        if let Err(e) = fs::remove_file(&path) {
            debug!(
                "Could not delete cache entry for '{}' at {}: {}",
                key,
                path.display(),
                e
            );
        }
    }
}

fn write_atomically(path: &Path, value: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "cache path has no parent directory",
        )
    })?;
    fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(value)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Owner of a file freshly created by this process, i.e. the effective uid.
#[cfg(unix)]
fn effective_uid() -> Option<u32> {
    use std::os::unix::fs::MetadataExt;

    let probe = tempfile::tempfile().ok()?;
    probe.metadata().ok().map(|meta| meta.uid())
}

/// Whether `path`, or its nearest existing ancestor, is owned by the
/// effective user. Inconclusive checks count as owned.
#[cfg(unix)]
pub fn check_path_owner(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Some(euid) = effective_uid() else {
        debug!("Effective user could not be determined; treating cache as usable");
        return true;
    };
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        match fs::symlink_metadata(ancestor) {
            Ok(meta) => return meta.uid() == euid,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                debug!(
                    "Ownership of {} could not be determined ({}); treating cache as usable",
                    ancestor.display(),
                    e
                );
                return true;
            }
        }
    }
    true
}

#[cfg(not(unix))]
pub fn check_path_owner(_path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = PermissionSafeCache::new(tmp.path().join("cache"));
        assert_eq!(cache.get("test key"), None);
        cache.set("test key", b"a test string");
        assert_eq!(cache.get("test key").as_deref(), Some(&b"a test string"[..]));
        cache.delete("test key");
        assert_eq!(cache.get("test key"), None);
    }

    #[test]
    fn keys_map_to_nested_digest_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = PermissionSafeCache::new(tmp.path());
        let path = cache.cache_path("https://example.com/simple/").unwrap();
        let relative = path.strip_prefix(tmp.path()).unwrap();
        let parts: Vec<_> = relative.iter().collect();
        assert_eq!(parts.len(), FANOUT_DEPTH + 1);
        assert_eq!(parts.last().unwrap().len(), 56);
        assert_eq!(cache.cache_path("https://example.com/simple/"), Some(path));
    }

    #[test]
    fn disabled_cache_is_a_no_op() {
        let cache = PermissionSafeCache::disabled();
        cache.set("foo", b"bar");
        assert_eq!(cache.get("foo"), None);
        cache.delete("foo");
        assert!(cache.directory().is_none());
    }

    #[test]
    fn delete_of_missing_entry_is_silent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = PermissionSafeCache::new(tmp.path());
        cache.delete("never stored");
    }

    #[cfg(unix)]
    mod unusable_root {
        use super::*;

        /// A cache rooted below a regular file: every entry path fails with
        /// `ENOTDIR` whatever the user's privileges.
        fn blocked_cache() -> (tempfile::TempDir, PermissionSafeCache) {
            let tmp = tempfile::tempdir().unwrap();
            let blocker = tmp.path().join("cache");
            fs::write(&blocker, b"not a directory").unwrap();
            let cache = PermissionSafeCache::new(blocker.join("root"));
            (tmp, cache)
        }

        #[test]
        fn get_on_unusable_root_misses() {
            let (_tmp, cache) = blocked_cache();
            assert_eq!(cache.get("foo"), None);
        }

        #[test]
        fn set_on_unusable_root_is_a_no_op() {
            let (tmp, cache) = blocked_cache();
            cache.set("foo", b"bar");
            assert_eq!(cache.get("foo"), None);
            assert_eq!(fs::read(tmp.path().join("cache")).unwrap(), b"not a directory");
        }

        #[test]
        fn delete_on_unusable_root_is_silent() {
            let (_tmp, cache) = blocked_cache();
            cache.delete("foo");
            assert_eq!(cache.get("foo"), None);
        }

        #[test]
        fn owned_directory_passes_owner_check() {
            let tmp = tempfile::tempdir().unwrap();
            assert!(check_path_owner(&tmp.path().join("not/yet/created")));
        }

        #[test]
        fn effective_uid_matches_own_files() {
            use std::os::unix::fs::MetadataExt;

            let tmp = tempfile::tempdir().unwrap();
            let owner = fs::metadata(tmp.path()).unwrap().uid();
            assert_eq!(effective_uid(), Some(owner));
        }
    }
}
