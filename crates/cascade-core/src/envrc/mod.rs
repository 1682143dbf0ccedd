//! `.envrc` discovery: script records and root-to-leaf chains.
//!
//! An [`Envrc`] models one per-directory script file. Its content hash binds
//! the absolute resolved path into the digest, so allowing file X does not
//! allow a symlink at Y with identical bytes.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// File name of the per-directory script.
pub const ENVRC_NAME: &str = ".envrc";

/// Errors from script discovery and hashing.
#[derive(Debug, Error)]
pub enum EnvrcError {
    /// Resolving a path to absolute form failed.
    #[error("absolute path {}: {source}", path.display())]
    Absolute {
        /// The path being resolved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A metadata lookup failed for a reason other than non-existence.
    #[error("stat {}: {source}", path.display())]
    Stat {
        /// The path being stat'ed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Symlink resolution failed (broken link, loop, or vanished target).
    #[error("resolve symlinks {}: {source}", path.display())]
    Resolve {
        /// The path being resolved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Reading file content for hashing failed.
    #[error("read file {}: {source}", path.display())]
    Read {
        /// The file being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The file does not exist where content was required.
    #[error("file does not exist: {}", path.display())]
    NotFound {
        /// The missing file.
        path: PathBuf,
    },

    /// The chain target is outside the chain root.
    #[error("target {} is not under root {}", target.display(), root.display())]
    NotUnderRoot {
        /// Resolved target directory.
        target: PathBuf,
        /// Resolved root directory.
        root: PathBuf,
    },
}

/// A single `.envrc` script record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envrc {
    /// Absolute path of the script. For a symlink this is the link itself,
    /// not its target: the link is the script's identity.
    pub path: PathBuf,

    /// Directory containing the script.
    pub dir: PathBuf,

    /// Whether the file currently exists.
    pub exists: bool,

    /// Hex SHA-256 of `resolved-path ∥ "\n" ∥ content`; empty if the file
    /// does not exist.
    pub content_hash: String,
}

impl Envrc {
    /// Build a record for `path`, computing the content hash if the file
    /// exists.
    ///
    /// The path is made absolute without touching the filesystem; symlinks
    /// are resolved only to locate the bytes to hash.
    ///
    /// # Errors
    ///
    /// Returns [`EnvrcError`] if the path cannot be made absolute, a stat
    /// fails for a reason other than non-existence, symlink resolution
    /// fails, or the resolved target cannot be read.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, EnvrcError> {
        let abs_path = absolute(path.as_ref())?;
        let dir = parent_of(&abs_path);

        let meta = match std::fs::symlink_metadata(&abs_path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    path: abs_path,
                    dir,
                    exists: false,
                    content_hash: String::new(),
                });
            },
            Err(e) => {
                return Err(EnvrcError::Stat {
                    path: abs_path,
                    source: e,
                });
            },
        };

        let resolved = if meta.file_type().is_symlink() {
            std::fs::canonicalize(&abs_path).map_err(|e| EnvrcError::Resolve {
                path: abs_path.clone(),
                source: e,
            })?
        } else {
            abs_path.clone()
        };

        let content_hash = file_hash(&resolved)?;

        Ok(Self {
            path: abs_path,
            dir,
            exists: true,
            content_hash,
        })
    }

    /// Read the script's content.
    ///
    /// # Errors
    ///
    /// Returns [`EnvrcError::NotFound`] if the file does not exist, or
    /// [`EnvrcError::Read`] if reading fails.
    pub fn content(&self) -> Result<Vec<u8>, EnvrcError> {
        if !self.exists {
            return Err(EnvrcError::NotFound {
                path: self.path.clone(),
            });
        }
        std::fs::read(&self.path).map_err(|e| EnvrcError::Read {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// Discover the `.envrc` chain from `root` down to `target`, inclusive.
///
/// Both paths are resolved to absolute form with symlinks evaluated; the
/// resolved target must be equal to or under the resolved root. The result
/// is ordered root-first and contains one record per directory, including
/// directories without a script (`exists = false`) so watch lists stay
/// complete.
///
/// # Errors
///
/// Returns [`EnvrcError::NotUnderRoot`] when the target escapes the root,
/// or any resolution/hashing error from [`Envrc::new`].
pub fn find_chain(
    root: impl AsRef<Path>,
    target: impl AsRef<Path>,
) -> Result<Vec<Envrc>, EnvrcError> {
    let abs_root = absolute(root.as_ref())?;
    let abs_target = absolute(target.as_ref())?;

    let abs_root = std::fs::canonicalize(&abs_root).map_err(|e| EnvrcError::Resolve {
        path: abs_root,
        source: e,
    })?;
    let abs_target = std::fs::canonicalize(&abs_target).map_err(|e| EnvrcError::Resolve {
        path: abs_target,
        source: e,
    })?;

    if !abs_target.starts_with(&abs_root) {
        return Err(EnvrcError::NotUnderRoot {
            target: abs_target,
            root: abs_root,
        });
    }

    // Walk up from the target, collecting directories until the root.
    let mut dirs = Vec::new();
    let mut current = abs_target.clone();
    loop {
        dirs.push(current.clone());
        if current == abs_root {
            break;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => {
                return Err(EnvrcError::NotUnderRoot {
                    target: abs_target,
                    root: abs_root,
                });
            },
        }
    }
    dirs.reverse();

    let mut chain = Vec::with_capacity(dirs.len());
    for dir in dirs {
        chain.push(Envrc::new(dir.join(ENVRC_NAME))?);
    }

    Ok(chain)
}

/// Filter a chain to the records whose file exists, preserving order.
#[must_use]
pub fn existing_only(chain: &[Envrc]) -> Vec<Envrc> {
    chain.iter().filter(|rc| rc.exists).cloned().collect()
}

/// Hex SHA-256 of just the absolute (symlink-resolved, when resolvable)
/// path. Keys deny entries, which must survive content changes.
///
/// # Errors
///
/// Returns [`EnvrcError::Absolute`] if the path cannot be made absolute.
pub fn path_hash(path: impl AsRef<Path>) -> Result<String, EnvrcError> {
    let mut abs_path = absolute(path.as_ref())?;

    // Resolve symlinks when the path exists; a missing path hashes as-is.
    if std::fs::symlink_metadata(&abs_path).is_ok() {
        if let Ok(resolved) = std::fs::canonicalize(&abs_path) {
            abs_path = resolved;
        }
    }

    Ok(hex::encode(Sha256::digest(
        abs_path.as_os_str().as_encoded_bytes(),
    )))
}

/// Hex SHA-256 of a directory's absolute path, used to key trust entries.
///
/// # Errors
///
/// Returns [`EnvrcError::Absolute`] if the path cannot be made absolute.
pub fn dir_path_hash(path: impl AsRef<Path>) -> Result<String, EnvrcError> {
    let abs_path = absolute(path.as_ref())?;
    Ok(hex::encode(Sha256::digest(
        abs_path.as_os_str().as_encoded_bytes(),
    )))
}

/// SHA-256 of `path ∥ "\n" ∥ content`: defeats both content modification
/// and symlink substitution.
fn file_hash(path: &Path) -> Result<String, EnvrcError> {
    let content = std::fs::read(path).map_err(|e| EnvrcError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update(b"\n");
    hasher.update(&content);

    Ok(hex::encode(hasher.finalize()))
}

fn absolute(path: &Path) -> Result<PathBuf, EnvrcError> {
    std::path::absolute(path).map_err(|e| EnvrcError::Absolute {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map_or_else(|| PathBuf::from("/"), Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_has_empty_hash() {
        let dir = tempfile::tempdir().unwrap();
        let rc = Envrc::new(dir.path().join(ENVRC_NAME)).unwrap();
        assert!(!rc.exists);
        assert!(rc.content_hash.is_empty());
        assert_eq!(rc.dir, dir.path());
    }

    #[test]
    fn test_hash_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENVRC_NAME);

        std::fs::write(&path, "export X=a").unwrap();
        let first = Envrc::new(&path).unwrap();

        std::fs::write(&path, "export X=b").unwrap();
        let second = Envrc::new(&path).unwrap();

        assert!(first.exists && second.exists);
        assert_ne!(first.content_hash, second.content_hash);
    }

    #[test]
    fn test_identical_content_different_paths_differ() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a").join(ENVRC_NAME);
        let b = dir.path().join("b").join(ENVRC_NAME);
        std::fs::create_dir_all(a.parent().unwrap()).unwrap();
        std::fs::create_dir_all(b.parent().unwrap()).unwrap();
        std::fs::write(&a, "export SAME=1").unwrap();
        std::fs::write(&b, "export SAME=1").unwrap();

        let rc_a = Envrc::new(&a).unwrap();
        let rc_b = Envrc::new(&b).unwrap();
        assert_ne!(rc_a.content_hash, rc_b.content_hash);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_keeps_identity_but_hashes_target() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        let real = base.join("real-envrc");
        let link = base.join(ENVRC_NAME);
        std::fs::write(&real, "export LINKED=1").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let via_link = Envrc::new(&link).unwrap();
        let direct = Envrc::new(&real).unwrap();

        // The link keeps its own path as identity...
        assert!(via_link.path.ends_with(ENVRC_NAME));
        // ...and hashes the resolved target, so the digests agree.
        assert_eq!(via_link.content_hash, direct.content_hash);
    }

    #[test]
    fn test_find_chain_orders_root_first() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let api = work.join("api");
        std::fs::create_dir_all(&api).unwrap();
        std::fs::write(dir.path().join(ENVRC_NAME), "export L=0").unwrap();
        std::fs::write(api.join(ENVRC_NAME), "export L=2").unwrap();

        let chain = find_chain(dir.path(), &api).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].exists);
        assert!(!chain[1].exists);
        assert!(chain[2].exists);
        assert!(chain[0].path.starts_with(std::fs::canonicalize(dir.path()).unwrap()));

        let existing = existing_only(&chain);
        assert_eq!(existing.len(), 2);
        assert_eq!(existing[0].path, chain[0].path);
    }

    #[test]
    fn test_find_chain_root_equals_target() {
        let dir = tempfile::tempdir().unwrap();
        let chain = find_chain(dir.path(), dir.path()).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_find_chain_rejects_escaping_target() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner");
        std::fs::create_dir(&inner).unwrap();

        let err = find_chain(&inner, dir.path()).unwrap_err();
        assert!(matches!(err, EnvrcError::NotUnderRoot { .. }));
    }

    #[test]
    fn test_path_hash_is_content_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENVRC_NAME);

        std::fs::write(&path, "export X=a").unwrap();
        let first = path_hash(&path).unwrap();

        std::fs::write(&path, "export X=b").unwrap();
        let second = path_hash(&path).unwrap();

        assert_eq!(first, second);
    }
}
