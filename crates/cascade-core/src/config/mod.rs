//! Configuration from the TOML file and `CASCADE_*` environment overrides.
//!
//! The file lives at `$XDG_CONFIG_HOME/cascade/config.toml` or
//! `~/.config/cascade/config.toml`. Every key can be overridden by an
//! environment variable named after it, upper-cased and prefixed with
//! `CASCADE_` (list values are `:`-separated).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Whitelister;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The user's home directory could not be determined.
    #[error("cannot determine home directory")]
    NoHome,

    /// The config file exists but could not be read.
    #[error("read config {}: {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("parse config {}: {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// Cascade configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory prefixes whose scripts are auto-allowed (lowest precedence
    /// in the authorization check, boundary-checked like subtree trust).
    pub whitelist_prefix: Vec<PathBuf>,

    /// Path to the bash binary. Empty means search `PATH`.
    pub bash_path: Option<PathBuf>,

    /// Shells excluded from doctor checks and hook emission.
    pub disabled_shells: Vec<String>,

    /// Override for the chain root. Defaults to the home directory.
    pub cascade_root: Option<PathBuf>,

    /// Whether evaluation caching is enabled.
    pub cache_enabled: bool,

    /// Whether to emit a per-invocation change summary to stderr.
    pub log_env_diff: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whitelist_prefix: Vec::new(),
            bash_path: None,
            disabled_shells: Vec::new(),
            cascade_root: None,
            cache_enabled: true,
            log_env_diff: true,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the config file if present, then
    /// `CASCADE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] only for an unreadable or unparseable file;
    /// a missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a specific config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The chain root: the configured override, else the home directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHome`] when no override is set and the home
    /// directory is unknown.
    pub fn cascade_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(root) = &self.cascade_root {
            return Ok(root.clone());
        }
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or(ConfigError::NoHome)
    }

    /// Whether a shell is listed in `disabled_shells` (case-insensitive).
    #[must_use]
    pub fn is_shell_disabled(&self, shell: &str) -> bool {
        self.disabled_shells
            .iter()
            .any(|s| s.eq_ignore_ascii_case(shell))
    }

    /// Apply `CASCADE_*` environment overrides via the supplied lookup,
    /// which exists so tests can override without touching the process
    /// environment.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CASCADE_WHITELIST_PREFIX") {
            self.whitelist_prefix = split_list(&v).map(PathBuf::from).collect();
        }
        if let Some(v) = lookup("CASCADE_BASH_PATH") {
            self.bash_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("CASCADE_DISABLED_SHELLS") {
            self.disabled_shells = split_list(&v).map(str::to_string).collect();
        }
        if let Some(v) = lookup("CASCADE_CASCADE_ROOT") {
            self.cascade_root = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("CASCADE_CACHE_ENABLED").and_then(|v| parse_bool(&v)) {
            self.cache_enabled = v;
        }
        if let Some(v) = lookup("CASCADE_LOG_ENV_DIFF").and_then(|v| parse_bool(&v)) {
            self.log_env_diff = v;
        }
    }
}

impl Whitelister for Config {
    /// True if the path is under any whitelisted prefix, checked at
    /// directory boundaries.
    fn is_whitelisted(&self, path: &Path) -> bool {
        self.whitelist_prefix
            .iter()
            .filter(|prefix| !prefix.as_os_str().is_empty())
            .any(|prefix| path.starts_with(prefix))
    }
}

/// The config file path that would be loaded, if one exists.
#[must_use]
pub fn config_file() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let candidate = PathBuf::from(xdg).join("cascade").join("config.toml");
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let home = directories::BaseDirs::new()?;
    let candidate = home
        .home_dir()
        .join(".config")
        .join("cascade")
        .join("config.toml");
    candidate.is_file().then_some(candidate)
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(':').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
