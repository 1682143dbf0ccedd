//! File modification-time snapshots and change detection.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use super::gzenv;

/// A snapshot of a file's modification state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTime {
    /// Absolute path of the watched file.
    #[serde(rename = "p")]
    pub path: PathBuf,

    /// Whole-second Unix modification time; 0 if the file does not exist.
    #[serde(rename = "m")]
    pub modtime: i64,

    /// Whether the file existed at snapshot time.
    #[serde(rename = "e")]
    pub exists: bool,
}

impl FileTime {
    /// Snapshot the file at `path`, following symlinks.
    ///
    /// Non-existence (or any stat failure) is a valid state recorded with
    /// `exists = false` and `modtime = 0`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => {
                let modtime = modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
                    .unwrap_or(0);
                Self {
                    path,
                    modtime,
                    exists: true,
                }
            },
            Err(_) => Self {
                path,
                modtime: 0,
                exists: false,
            },
        }
    }

    /// Re-stat now and report whether the file changed since this snapshot:
    /// created, deleted, or modified.
    #[must_use]
    pub fn check(&self) -> bool {
        let current = Self::new(&self.path);
        if self.exists != current.exists {
            return true;
        }
        self.exists && self.modtime != current.modtime
    }
}

/// An ordered collection of watched files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchList(Vec<FileTime>);

impl WatchList {
    /// Snapshot every path in order.
    #[must_use]
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self(paths.into_iter().map(|p| FileTime::new(p.as_ref())).collect())
    }

    /// True if any watched file has changed since its snapshot.
    #[must_use]
    pub fn check(&self) -> bool {
        self.0.iter().any(FileTime::check)
    }

    /// Iterate the snapshots in order.
    pub fn iter(&self) -> impl Iterator<Item = &FileTime> {
        self.0.iter()
    }

    /// Number of watched files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode for storage in `CASCADE_WATCHES`. Empty lists encode to the
    /// empty string.
    ///
    /// # Errors
    ///
    /// Returns [`gzenv::GzenvError`] if serialization or compression fails.
    pub fn serialize(&self) -> Result<String, gzenv::GzenvError> {
        if self.0.is_empty() {
            return Ok(String::new());
        }
        gzenv::marshal(self)
    }

    /// Decode a list previously encoded with [`WatchList::serialize`].
    ///
    /// # Errors
    ///
    /// Returns [`gzenv::GzenvError`] on invalid base64, zlib, or JSON.
    pub fn parse(encoded: &str) -> Result<Self, gzenv::GzenvError> {
        if encoded.is_empty() {
            return Ok(Self::default());
        }
        gzenv::unmarshal(encoded)
    }
}

impl<'a> IntoIterator for &'a WatchList {
    type Item = &'a FileTime;
    type IntoIter = std::slice::Iter<'a, FileTime>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_has_zero_modtime() {
        let ft = FileTime::new("/nonexistent/cascade/test/path");
        assert!(!ft.exists);
        assert_eq!(ft.modtime, 0);
    }

    #[test]
    fn test_existing_file_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched");
        std::fs::write(&path, "content").unwrap();

        let ft = FileTime::new(&path);
        assert!(ft.exists);
        assert!(ft.modtime > 0);
        assert!(!ft.check());
    }

    #[test]
    fn test_check_detects_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched");
        std::fs::write(&path, "content").unwrap();

        let ft = FileTime::new(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(ft.check());
    }

    #[test]
    fn test_check_detects_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched");

        let ft = FileTime::new(&path);
        std::fs::write(&path, "now exists").unwrap();
        assert!(ft.check());
    }

    #[test]
    fn test_watchlist_serialize_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        std::fs::write(&path, "x").unwrap();

        let wl = WatchList::new([&path, &dir.path().join("missing")]);
        let encoded = wl.serialize().unwrap();
        assert_eq!(WatchList::parse(&encoded).unwrap(), wl);
    }

    #[test]
    fn test_empty_watchlist_serializes_to_empty_string() {
        let wl = WatchList::default();
        assert_eq!(wl.serialize().unwrap(), "");
        assert!(WatchList::parse("").unwrap().is_empty());
    }
}
