//! Reversible environment diffs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::gzenv;
use super::Env;

/// The changes between two environments.
///
/// Captures the minimal information needed to transform one environment into
/// another and to reverse that transformation. The empty string is the
/// sentinel for "variable absent": an added key has `prev = ""`, a removed
/// key has `next = ""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvDiff {
    /// Values to restore on revert. Original values for changed or removed
    /// keys; empty for added keys.
    #[serde(rename = "p", default)]
    pub prev: BTreeMap<String, String>,

    /// Values to apply. New values for changed or added keys; empty for
    /// removed keys.
    #[serde(rename = "n", default)]
    pub next: BTreeMap<String, String>,
}

impl EnvDiff {
    /// Compute the diff from `e1` (before) to `e2` (after).
    ///
    /// Both environments are filtered through the ignored-key list before
    /// comparison. Keys with identical values on both sides do not appear.
    #[must_use]
    pub fn build(e1: &Env, e2: &Env) -> Self {
        let f1 = e1.filtered();
        let f2 = e2.filtered();

        let mut diff = Self::default();

        for (key, v1) in f1.iter() {
            match f2.get(key) {
                Some(v2) if v2 == v1.as_str() => {},
                Some(v2) => {
                    diff.prev.insert(key.clone(), v1.clone());
                    diff.next.insert(key.clone(), v2.to_string());
                },
                None => {
                    diff.prev.insert(key.clone(), v1.clone());
                    diff.next.insert(key.clone(), String::new());
                },
            }
        }

        for (key, v2) in f2.iter() {
            if !f1.contains_key(key) {
                diff.prev.insert(key.clone(), String::new());
                diff.next.insert(key.clone(), v2.clone());
            }
        }

        diff
    }

    /// Apply the diff to an environment, returning a new environment.
    ///
    /// Keys with empty `next` values are deleted; everything else is set.
    #[must_use]
    pub fn apply(&self, env: &Env) -> Env {
        let mut result = env.clone();
        for (key, value) in &self.next {
            if value.is_empty() {
                result.remove(key);
            } else {
                result.insert(key.clone(), value.clone());
            }
        }
        result
    }

    /// A new diff that undoes this one.
    #[must_use]
    pub fn reverse(&self) -> Self {
        Self {
            prev: self.next.clone(),
            next: self.prev.clone(),
        }
    }

    /// True iff no changes are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prev.is_empty() && self.next.is_empty()
    }

    /// True iff both diffs apply the same outcome.
    ///
    /// Compares only the `next` maps. Weaker than structural equality: the
    /// baselines the two diffs were computed against may differ while the
    /// applied effect is identical. The export orchestrator uses this to
    /// suppress redundant log lines on every prompt.
    #[must_use]
    pub fn equal_effect(&self, other: &Self) -> bool {
        self.next == other.next
    }

    /// Encode for storage in a shell variable (`CASCADE_DIFF`).
    ///
    /// Empty diffs encode to the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`gzenv::GzenvError`] if serialization or compression fails.
    pub fn marshal(&self) -> Result<String, gzenv::GzenvError> {
        if self.is_empty() {
            return Ok(String::new());
        }
        gzenv::marshal(self)
    }

    /// Decode a diff previously encoded with [`EnvDiff::marshal`].
    ///
    /// The empty string decodes to an empty diff; missing maps are
    /// normalized to empty maps.
    ///
    /// # Errors
    ///
    /// Returns [`gzenv::GzenvError`] on invalid base64, zlib, or JSON.
    pub fn unmarshal(encoded: &str) -> Result<Self, gzenv::GzenvError> {
        if encoded.is_empty() {
            return Ok(Self::default());
        }
        gzenv::unmarshal(encoded)
    }
}
