//! The allow/deny/trust store: cascade's security boundary.
//!
//! Three directories of hash-named files under the data root:
//!
//! - `allow/<content-hash>` — script allowed by exact content at exact path.
//! - `deny/<path-hash>` — script denied by path, surviving content changes.
//! - `trust/<dirpath-hash>` — whole subtree trusted.
//!
//! Each entry's payload is the absolute path it refers to, which is
//! informational for `allow`/`deny` and load-bearing for `trust` (the
//! subtree check enumerates payloads). Entries are single files created and
//! removed whole, so concurrent invocations converge without locks.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::envrc::{self, Envrc, EnvrcError};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The user's home directory could not be determined.
    #[error("cannot determine home directory")]
    NoHome,

    /// The script must exist for this operation.
    #[error("cannot allow non-existent file: {}", path.display())]
    NotFound {
        /// The missing script.
        path: PathBuf,
    },

    /// The script has no content hash (should not happen for existing files).
    #[error("cannot allow file without content hash: {}", path.display())]
    NoContentHash {
        /// The script in question.
        path: PathBuf,
    },

    /// Trust target is not a directory.
    #[error("not a directory: {}", path.display())]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// Untrust target was never trusted.
    #[error("subtree not trusted: {}", path.display())]
    NotTrusted {
        /// The untrusted path.
        path: PathBuf,
    },

    /// Path hashing failed.
    #[error(transparent)]
    Envrc(#[from] EnvrcError),

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

impl AuthError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Authorization state of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowStatus {
    /// Explicitly allowed: the content hash matches an allow entry, or the
    /// path is under a trusted subtree or whitelisted prefix.
    Allowed,
    /// Not yet allowed; needs user approval.
    NotAllowed,
    /// Explicitly denied by path.
    Denied,
}

impl fmt::Display for AllowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::NotAllowed => write!(f, "not allowed"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Checks whether a path is auto-allowed by configuration.
pub trait Whitelister {
    /// True if `path` falls under a whitelisted directory prefix.
    fn is_whitelisted(&self, path: &Path) -> bool;
}

/// Persistent allow/deny/trust state for scripts.
#[derive(Debug, Clone)]
pub struct Store {
    allow_dir: PathBuf,
    deny_dir: PathBuf,
    trust_dir: PathBuf,
}

impl Store {
    /// Open the store at the XDG-compliant default location:
    /// `$XDG_DATA_HOME/cascade/` or `~/.local/share/cascade/`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoHome`] if neither `XDG_DATA_HOME` nor a home
    /// directory is available.
    pub fn new() -> Result<Self, AuthError> {
        Ok(Self::with_base(data_dir()?.join("cascade")))
    }

    /// Open a store rooted at an explicit base directory (used by tests).
    #[must_use]
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            allow_dir: base.join("allow"),
            deny_dir: base.join("deny"),
            trust_dir: base.join("trust"),
        }
    }

    /// Authorization status of a script, without whitelist consultation.
    #[must_use]
    pub fn check(&self, rc: &Envrc) -> AllowStatus {
        self.check_with_whitelist(rc, None)
    }

    /// Authorization status of a script.
    ///
    /// Precedence, first match wins:
    /// 1. deny entry for the path hash → [`AllowStatus::Denied`]
    /// 2. allow entry for the content hash → [`AllowStatus::Allowed`]
    /// 3. path under a trusted subtree → [`AllowStatus::Allowed`]
    /// 4. path under a whitelisted prefix → [`AllowStatus::Allowed`]
    /// 5. otherwise → [`AllowStatus::NotAllowed`]
    #[must_use]
    pub fn check_with_whitelist(
        &self,
        rc: &Envrc,
        whitelist: Option<&dyn Whitelister>,
    ) -> AllowStatus {
        if let Ok(path_hash) = envrc::path_hash(&rc.path) {
            if self.deny_dir.join(path_hash).exists() {
                return AllowStatus::Denied;
            }
        }

        if !rc.content_hash.is_empty() && self.allow_dir.join(&rc.content_hash).exists() {
            return AllowStatus::Allowed;
        }

        if self.is_trusted_subtree(&rc.path) {
            return AllowStatus::Allowed;
        }

        if let Some(wl) = whitelist {
            if wl.is_whitelisted(&rc.path) {
                return AllowStatus::Allowed;
            }
        }

        AllowStatus::NotAllowed
    }

    /// Allow a script by content hash and clear any deny entry for its path.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the script does not exist, has no content
    /// hash, or a filesystem operation fails.
    pub fn allow(&self, rc: &Envrc) -> Result<(), AuthError> {
        if !rc.exists {
            return Err(AuthError::NotFound {
                path: rc.path.clone(),
            });
        }
        if rc.content_hash.is_empty() {
            return Err(AuthError::NoContentHash {
                path: rc.path.clone(),
            });
        }

        create_store_dir(&self.allow_dir)?;
        write_entry(&self.allow_dir.join(&rc.content_hash), &rc.path)?;

        let path_hash = envrc::path_hash(&rc.path)?;
        remove_if_present(&self.deny_dir.join(path_hash), "remove deny entry")?;

        Ok(())
    }

    /// Deny a script by path hash and clear any allow entry for its content.
    ///
    /// The script does not need to exist: denying a removed file keeps its
    /// path blocked if it reappears.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if a hash or filesystem operation fails.
    pub fn deny(&self, rc: &Envrc) -> Result<(), AuthError> {
        let path_hash = envrc::path_hash(&rc.path)?;

        create_store_dir(&self.deny_dir)?;
        write_entry(&self.deny_dir.join(path_hash), &rc.path)?;

        if !rc.content_hash.is_empty() {
            remove_if_present(&self.allow_dir.join(&rc.content_hash), "remove allow entry")?;
        }

        Ok(())
    }

    /// Remove both allow and deny entries, returning the script to
    /// [`AllowStatus::NotAllowed`]. Missing entries are not errors.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if a removal fails for a reason other than
    /// the entry being absent.
    pub fn revoke(&self, rc: &Envrc) -> Result<(), AuthError> {
        if !rc.content_hash.is_empty() {
            remove_if_present(&self.allow_dir.join(&rc.content_hash), "remove allow entry")?;
        }

        let path_hash = envrc::path_hash(&rc.path)?;
        remove_if_present(&self.deny_dir.join(path_hash), "remove deny entry")?;

        Ok(())
    }

    /// Trust a directory subtree: every script under it is auto-allowed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotADirectory`] if the path is not an existing
    /// directory, or an I/O error from writing the trust entry.
    pub fn trust_subtree(&self, path: impl AsRef<Path>) -> Result<PathBuf, AuthError> {
        let abs_path = std::path::absolute(path.as_ref()).map_err(|e| {
            AuthError::io(format!("resolve path {}", path.as_ref().display()), e)
        })?;

        let meta = std::fs::metadata(&abs_path)
            .map_err(|e| AuthError::io(format!("stat {}", abs_path.display()), e))?;
        if !meta.is_dir() {
            return Err(AuthError::NotADirectory { path: abs_path });
        }

        create_store_dir(&self.trust_dir)?;
        let hash = envrc::dir_path_hash(&abs_path)?;
        write_entry(&self.trust_dir.join(hash), &abs_path)?;

        Ok(abs_path)
    }

    /// Remove subtree trust.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotTrusted`] if the subtree was not trusted.
    pub fn untrust_subtree(&self, path: impl AsRef<Path>) -> Result<PathBuf, AuthError> {
        let abs_path = std::path::absolute(path.as_ref()).map_err(|e| {
            AuthError::io(format!("resolve path {}", path.as_ref().display()), e)
        })?;

        let hash = envrc::dir_path_hash(&abs_path)?;
        match std::fs::remove_file(self.trust_dir.join(hash)) {
            Ok(()) => Ok(abs_path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(AuthError::NotTrusted { path: abs_path })
            },
            Err(e) => Err(AuthError::io("remove trust entry", e)),
        }
    }

    /// Whether `path` is equal to or under any trusted subtree.
    #[must_use]
    pub fn is_trusted_subtree(&self, path: impl AsRef<Path>) -> bool {
        let Ok(abs_path) = std::path::absolute(path.as_ref()) else {
            return false;
        };
        let Ok(trusted) = self.list_trusted_subtrees() else {
            return false;
        };

        trusted.iter().any(|t| is_under_path(&abs_path, t))
    }

    /// All trusted subtree paths, in directory-read order.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the trust directory exists but cannot
    /// be read. A missing trust directory yields an empty list.
    pub fn list_trusted_subtrees(&self) -> Result<Vec<PathBuf>, AuthError> {
        let entries = match std::fs::read_dir(&self.trust_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AuthError::io("read trust directory", e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AuthError::io("read trust directory", e))?;
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            // Unreadable entries are skipped, not fatal.
            if let Ok(content) = std::fs::read_to_string(entry.path()) {
                paths.push(PathBuf::from(content));
            }
        }

        Ok(paths)
    }
}

/// Directory-boundary prefix check: `child == parent` or `child` starts
/// with `parent` plus a separator.
fn is_under_path(child: &Path, parent: &Path) -> bool {
    child.starts_with(parent)
}

fn data_dir() -> Result<PathBuf, AuthError> {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".local").join("share"))
        .ok_or(AuthError::NoHome)
}

fn create_store_dir(dir: &Path) -> Result<(), AuthError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AuthError::io(format!("create directory {}", dir.display()), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| AuthError::io(format!("set permissions on {}", dir.display()), e))?;
    }
    Ok(())
}

fn write_entry(path: &Path, payload: &Path) -> Result<(), AuthError> {
    std::fs::write(path, payload.as_os_str().as_encoded_bytes())
        .map_err(|e| AuthError::io(format!("write {}", path.display()), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| AuthError::io(format!("set permissions on {}", path.display()), e))?;
    }
    Ok(())
}

fn remove_if_present(path: &Path, context: &str) -> Result<(), AuthError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AuthError::io(context, e)),
    }
}
