//! Content+input-addressed memoization of evaluation results.
//!
//! One JSON file per (script, input-env) pair under the cache root. The key
//! digests the script's content hash (which already binds the path) and
//! every input variable, so the cache invalidates itself on script change,
//! path change, or input change. The cache is strictly a hint: read and
//! parse failures are misses, write failures are non-fatal.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::EvalResult;
use crate::env::Env;
use crate::envrc::Envrc;

/// Errors from cache housekeeping. Lookup never errors (a failed read is a
/// miss); these surface only from creation, storage, and clearing.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The user's home directory could not be determined.
    #[error("cannot determine home directory")]
    NoHome,

    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Serializing an entry failed.
    #[error("marshal cache entry: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl CacheError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// On-disk format of a cached evaluation result.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    timestamp: DateTime<Utc>,
    /// Originating script, for debugging only; not part of the key.
    rc_path: PathBuf,
    result: Env,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extra_watches: Vec<PathBuf>,
}

/// Evaluation result cache backed by a directory of JSON files.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Open the cache at `$XDG_CACHE_HOME/cascade` or `~/.cache/cascade`,
    /// creating the directory with user-only permissions.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the home directory is unknown or the
    /// directory cannot be created.
    pub fn new() -> Result<Self, CacheError> {
        let cache_home = match std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".cache"))
                .ok_or(CacheError::NoHome)?,
        };
        Self::with_dir(cache_home.join("cascade"))
    }

    /// Open a cache at an explicit directory (used by tests).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be created.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CacheError::io(format!("create cache directory {}", dir.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| CacheError::io("set cache directory permissions", e))?;
        }
        Ok(Self { dir })
    }

    /// Look up a cached result. Any failure to read or parse is a miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<EvalResult> {
        let data = std::fs::read(self.entry_path(key)).ok()?;
        let entry: CacheEntry = serde_json::from_slice(&data).ok()?;
        Some(EvalResult {
            env: entry.result,
            extra_watches: entry.extra_watches,
        })
    }

    /// Store an evaluation result, atomically via temp-then-rename.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on serialization or I/O failure; callers
    /// treat this as non-fatal.
    pub fn set(&self, key: &str, result: &EvalResult, rc_path: &Path) -> Result<(), CacheError> {
        let entry = CacheEntry {
            timestamp: Utc::now(),
            rc_path: rc_path.to_path_buf(),
            result: result.env.clone(),
            extra_watches: result.extra_watches.clone(),
        };

        let data = serde_json::to_vec(&entry).map_err(CacheError::Serialize)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| CacheError::io("create temp cache file", e))?;
        tmp.write_all(&data)
            .map_err(|e| CacheError::io("write cache entry", e))?;
        tmp.persist(self.entry_path(key))
            .map_err(|e| CacheError::io("rename cache entry", e.error))?;

        Ok(())
    }

    /// Remove all cached entries. Only `.json` files are touched.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be read or an
    /// entry cannot be removed.
    pub fn clear(&self) -> Result<(), CacheError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io("read cache directory", e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io("read cache directory", e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match std::fs::remove_file(&path) {
                    Ok(()) => {},
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                    Err(e) => {
                        return Err(CacheError::io(
                            format!("remove cache entry {}", path.display()),
                            e,
                        ));
                    },
                }
            }
        }

        Ok(())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

/// Compute the cache key for an evaluation:
/// `SHA-256(content-hash ∥ "\n" ∥ (KEY=VALUE ∥ NUL)*)` over the sorted
/// input environment.
#[must_use]
pub fn cache_key(rc: &Envrc, input_env: &Env) -> String {
    let mut hasher = Sha256::new();

    // The content hash already binds the script's path and bytes.
    hasher.update(rc.content_hash.as_bytes());
    hasher.update(b"\n");

    for entry in input_env.to_host_env() {
        hasher.update(entry.as_bytes());
        hasher.update(b"\x00");
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envrc::ENVRC_NAME;

    fn fixture_rc(dir: &Path, content: &str) -> Envrc {
        let path = dir.join(ENVRC_NAME);
        std::fs::write(&path, content).unwrap();
        Envrc::new(&path).unwrap()
    }

    fn result_with(key: &str, value: &str) -> EvalResult {
        EvalResult {
            env: Env::from_host_env([format!("{key}={value}")]),
            extra_watches: Vec::new(),
        }
    }

    #[test]
    fn test_get_on_empty_cache_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path().join("cache")).unwrap();
        assert!(cache.get("no-such-key").is_none());
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path().join("cache")).unwrap();
        let result = result_with("MYVAR", "value");

        cache.set("key1", &result, Path::new("/h/.envrc")).unwrap();
        assert_eq!(cache.get("key1"), Some(result));
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path().join("cache")).unwrap();
        std::fs::write(cache.entry_path("bad"), "{ not json").unwrap();
        assert!(cache.get("bad").is_none());
    }

    #[test]
    fn test_clear_removes_only_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path().join("cache")).unwrap();
        cache
            .set("key1", &result_with("A", "1"), Path::new("/h/.envrc"))
            .unwrap();
        let keep = dir.path().join("cache").join("README");
        std::fs::write(&keep, "not a cache entry").unwrap();

        cache.clear().unwrap();
        assert!(cache.get("key1").is_none());
        assert!(keep.exists());
    }

    #[test]
    fn test_key_changes_with_input_env() {
        let dir = tempfile::tempdir().unwrap();
        let rc = fixture_rc(dir.path(), "export MYVAR=$IN");

        let first = cache_key(&rc, &Env::from_host_env(["IN=first"]));
        let second = cache_key(&rc, &Env::from_host_env(["IN=second"]));
        let first_again = cache_key(&rc, &Env::from_host_env(["IN=first"]));

        assert_ne!(first, second);
        assert_eq!(first, first_again);
    }

    #[test]
    fn test_key_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let env = Env::from_host_env(["IN=x"]);

        let rc_a = fixture_rc(dir.path(), "export X=a");
        let key_a = cache_key(&rc_a, &env);

        let rc_b = fixture_rc(dir.path(), "export X=b");
        let key_b = cache_key(&rc_b, &env);

        assert_ne!(key_a, key_b);
    }

    #[test]
    fn test_key_is_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        let rc = fixture_rc(dir.path(), "export X=1");

        // BTreeMap-backed Env sorts on construction; both insertion orders
        // must digest identically.
        let ab = Env::from_host_env(["A=1", "B=2"]);
        let ba = Env::from_host_env(["B=2", "A=1"]);
        assert_eq!(cache_key(&rc, &ab), cache_key(&rc, &ba));
    }

    #[test]
    fn test_miss_store_hit_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::with_dir(dir.path().join("cache")).unwrap();
        let rc = fixture_rc(dir.path(), "export MYVAR=$IN");

        let key_first = cache_key(&rc, &Env::from_host_env(["IN=first"]));
        let key_second = cache_key(&rc, &Env::from_host_env(["IN=second"]));

        assert!(cache.get(&key_first).is_none());
        cache
            .set(&key_first, &result_with("MYVAR", "first"), &rc.path)
            .unwrap();

        assert!(cache.get(&key_second).is_none());
        cache
            .set(&key_second, &result_with("MYVAR", "second"), &rc.path)
            .unwrap();

        let hit = cache.get(&key_first).unwrap();
        assert_eq!(hit.env.get("MYVAR"), Some("first"));
    }
}
