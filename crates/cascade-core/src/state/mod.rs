//! Durable record of the last-applied diff per script.
//!
//! When a previously allowed script becomes denied or disappears and the
//! session-carried `CASCADE_DIFF` is gone (e.g. the parent shell did not
//! propagate it), these records let the orchestrator reconstruct what needs
//! reverting. One JSON file per script path, keyed by the path's SHA-256,
//! written atomically via temp-then-rename.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::env::EnvDiff;

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// The user's home directory could not be determined.
    #[error("cannot determine home directory")]
    NoHome,

    /// JSON serialization or deserialization failed.
    #[error("state entry for {}: {source}", path.display())]
    Json {
        /// The script the entry belongs to.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl StateError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// The saved state for a single script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirState {
    /// Absolute script path.
    #[serde(rename = "path")]
    pub path: PathBuf,

    /// Content hash at the time of save.
    #[serde(rename = "hash")]
    pub content_hash: String,

    /// The diff that was applied.
    #[serde(rename = "diff")]
    pub diff: EnvDiff,

    /// Save time.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

/// Persistent per-script state records.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Open the store at `$XDG_DATA_HOME/cascade/state/` or
    /// `~/.local/share/cascade/state/`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the home directory is unknown or the
    /// directory cannot be created.
    pub fn new() -> Result<Self, StateError> {
        let data_home = match std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".local").join("share"))
                .ok_or(StateError::NoHome)?,
        };
        Self::with_dir(data_home.join("cascade").join("state"))
    }

    /// Open a store at an explicit directory (used by tests).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory cannot be created.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StateError::io(format!("create state directory {}", dir.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| StateError::io("set state directory permissions", e))?;
        }
        Ok(Self { dir })
    }

    /// Persist the diff applied for a script, overwriting any prior entry.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on serialization or I/O failure. The write is
    /// atomic: a crash leaves either the old entry or the new one.
    pub fn save(
        &self,
        rc_path: impl AsRef<Path>,
        content_hash: impl Into<String>,
        diff: &EnvDiff,
    ) -> Result<(), StateError> {
        let abs_path = absolute(rc_path.as_ref())?;

        let state = DirState {
            path: abs_path.clone(),
            content_hash: content_hash.into(),
            diff: diff.clone(),
            timestamp: Utc::now(),
        };

        let data = serde_json::to_vec(&state).map_err(|e| StateError::Json {
            path: abs_path.clone(),
            source: e,
        })?;

        let state_file = self.entry_path(&abs_path);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| StateError::io("create temp state file", e))?;
        tmp.write_all(&data)
            .map_err(|e| StateError::io("write temp state file", e))?;
        tmp.persist(&state_file)
            .map_err(|e| StateError::io("rename state file", e.error))?;

        Ok(())
    }

    /// Load the last saved state for a script path.
    ///
    /// A missing entry is `Ok(None)`, not an error. A malformed or empty
    /// entry is an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on read failure or invalid JSON.
    pub fn load(&self, rc_path: impl AsRef<Path>) -> Result<Option<DirState>, StateError> {
        let abs_path = absolute(rc_path.as_ref())?;
        let state_file = self.entry_path(&abs_path);

        let data = match std::fs::read(&state_file) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::io(
                    format!("read state file {}", state_file.display()),
                    e,
                ));
            },
        };

        let state = serde_json::from_slice(&data).map_err(|e| StateError::Json {
            path: abs_path,
            source: e,
        })?;

        Ok(Some(state))
    }

    /// Remove the state entry for a script path. Idempotent: a missing
    /// entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if removal fails for a reason other than
    /// the entry being absent.
    pub fn delete(&self, rc_path: impl AsRef<Path>) -> Result<(), StateError> {
        let abs_path = absolute(rc_path.as_ref())?;
        let state_file = self.entry_path(&abs_path);

        match std::fs::remove_file(&state_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::io(
                format!("remove state file {}", state_file.display()),
                e,
            )),
        }
    }

    fn entry_path(&self, abs_path: &Path) -> PathBuf {
        let hash = hex::encode(Sha256::digest(abs_path.as_os_str().as_encoded_bytes()));
        self.dir.join(format!("{hash}.json"))
    }
}

fn absolute(path: &Path) -> Result<PathBuf, StateError> {
    std::path::absolute(path)
        .map_err(|e| StateError::io(format!("resolve path {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn sample_diff() -> EnvDiff {
        EnvDiff {
            prev: BTreeMap::from([("X".to_string(), String::new())]),
            next: BTreeMap::from([("X".to_string(), "new".to_string())]),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::with_dir(dir.path().join("state")).unwrap();
        let rc_path = dir.path().join(".envrc");

        let diff = sample_diff();
        store.save(&rc_path, "hash123", &diff).unwrap();

        let loaded = store.load(&rc_path).unwrap().unwrap();
        assert_eq!(loaded.path, std::path::absolute(&rc_path).unwrap());
        assert_eq!(loaded.content_hash, "hash123");
        assert_eq!(loaded.diff, diff);
    }

    #[test]
    fn test_load_missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::with_dir(dir.path().join("state")).unwrap();
        assert!(store.load(dir.path().join(".envrc")).unwrap().is_none());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::with_dir(dir.path().join("state")).unwrap();
        let rc_path = dir.path().join(".envrc");

        store.save(&rc_path, "first", &sample_diff()).unwrap();
        store.save(&rc_path, "second", &sample_diff()).unwrap();

        let loaded = store.load(&rc_path).unwrap().unwrap();
        assert_eq!(loaded.content_hash, "second");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::with_dir(dir.path().join("state")).unwrap();
        let rc_path = dir.path().join(".envrc");

        store.save(&rc_path, "hash", &sample_diff()).unwrap();
        store.delete(&rc_path).unwrap();
        assert!(store.load(&rc_path).unwrap().is_none());

        // Deleting again is fine.
        store.delete(&rc_path).unwrap();
    }

    #[test]
    fn test_malformed_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::with_dir(dir.path().join("state")).unwrap();
        let rc_path = dir.path().join(".envrc");

        store.save(&rc_path, "hash", &sample_diff()).unwrap();

        // Corrupt the file on disk.
        let abs = std::path::absolute(&rc_path).unwrap();
        let entry = store.entry_path(&abs);
        std::fs::write(&entry, "not json").unwrap();
        assert!(matches!(store.load(&rc_path), Err(StateError::Json { .. })));

        std::fs::write(&entry, "").unwrap();
        assert!(store.load(&rc_path).is_err());
    }

    #[test]
    fn test_entries_are_keyed_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::with_dir(dir.path().join("state")).unwrap();

        let a = dir.path().join("a").join(".envrc");
        let b = dir.path().join("b").join(".envrc");
        store.save(&a, "hash-a", &sample_diff()).unwrap();
        store.save(&b, "hash-b", &sample_diff()).unwrap();

        assert_eq!(store.load(&a).unwrap().unwrap().content_hash, "hash-a");
        assert_eq!(store.load(&b).unwrap().unwrap().content_hash, "hash-b");
    }
}
