//! Environment variable types and operations.
//!
//! [`Env`] models a process environment as a sorted map, [`EnvDiff`] captures
//! the minimal reversible transform between two environments, and the
//! [`gzenv`] codec carries diffs and watch lists inside shell variables.

mod diff;
pub mod gzenv;
mod ignore;
mod watch;

use std::collections::BTreeMap;

pub use diff::EnvDiff;
pub use ignore::is_ignored;
use serde::{Deserialize, Serialize};
pub use watch::{FileTime, WatchList};

/// A process environment: variable names mapped to string values.
///
/// Backed by a `BTreeMap` so that every iteration is already in ascending
/// key order, which keeps diffs, cache keys, and shell transcripts
/// deterministic without explicit sorting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Env(BTreeMap<String, String>);

impl Env {
    /// Create an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build an environment from `KEY=VALUE` lines as handed over by the
    /// host process.
    ///
    /// An entry without an `=` is invalid and dropped. The first `=` splits
    /// key from value; later `=`s remain part of the value. Empty values are
    /// preserved.
    pub fn from_host_env<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        for line in lines {
            if let Some((key, value)) = line.as_ref().split_once('=') {
                map.insert(key.to_string(), value.to_string());
            }
        }
        Self(map)
    }

    /// Snapshot the current process environment.
    ///
    /// Entries that are not valid Unicode are dropped, mirroring the
    /// invalid-line handling of [`Env::from_host_env`].
    #[must_use]
    pub fn current() -> Self {
        let mut map = BTreeMap::new();
        for (key, value) in std::env::vars_os() {
            if let (Ok(key), Ok(value)) = (key.into_string(), value.into_string()) {
                map.insert(key, value);
            }
        }
        Self(map)
    }

    /// Render as sorted `KEY=VALUE` lines, suitable for a child process
    /// environment.
    #[must_use]
    pub fn to_host_env(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    /// A copy with every ignored key removed (see [`is_ignored`]).
    #[must_use]
    pub fn filtered(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !is_ignored(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether the variable is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a variable, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a variable, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Iterate `(name, value)` pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the environment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Env {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Env {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
