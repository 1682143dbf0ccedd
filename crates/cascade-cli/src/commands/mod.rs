//! The cascade CLI commands, one module per subcommand.

pub mod allow;
pub mod check;
mod colorizer;
pub mod config;
pub mod deny;
pub mod doctor;
pub mod dump;
pub mod export;
pub mod hook;
pub mod migrate;
pub mod status;
pub mod tree;
pub mod trust;
pub mod which;

use std::path::Path;

pub(crate) use colorizer::Colorizer;

/// Replace a home-directory prefix with `~` for display.
pub(crate) fn shorten_path(path: &Path, home: Option<&Path>) -> String {
    if let Some(home) = home {
        if let Ok(rel) = path.strip_prefix(home) {
            if rel.as_os_str().is_empty() {
                return "~".to_string();
            }
            return format!("~/{}", rel.display());
        }
    }
    path.display().to_string()
}

/// Shorten each entry of a colon-separated path list.
pub(crate) fn shorten_path_list(list: &str, home: Option<&Path>) -> String {
    list.split(':')
        .map(|part| shorten_path(Path::new(part), home))
        .collect::<Vec<_>>()
        .join(":")
}

/// The user's home directory, for path shortening.
pub(crate) fn home_dir() -> Option<std::path::PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Truncate a long value for display.
pub(crate) fn truncate_value(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        return value.to_string();
    }
    let prefix: String = value.chars().take(max_len.saturating_sub(3)).collect();
    format!("{prefix}...")
}

/// Whether a variable conventionally holds a colon-separated path list.
pub(crate) fn is_path_like_var(name: &str) -> bool {
    matches!(
        name,
        "PATH"
            | "MANPATH"
            | "INFOPATH"
            | "LD_LIBRARY_PATH"
            | "LIBRARY_PATH"
            | "CPATH"
            | "PKG_CONFIG_PATH"
            | "PYTHONPATH"
            | "GOPATH"
            | "NODE_PATH"
            | "CLASSPATH"
            | "CDPATH"
    )
}

/// Classify how a path-like variable changed: prepended, appended,
/// modified on both ends, or replaced outright.
pub(crate) fn detect_path_action(old_value: &str, new_value: &str) -> &'static str {
    if old_value.is_empty() {
        return "set";
    }
    if new_value.ends_with(&format!(":{old_value}")) {
        return "prepend";
    }
    if new_value.starts_with(&format!("{old_value}:")) {
        return "append";
    }
    if new_value.contains(&format!(":{old_value}:")) {
        return "modify";
    }
    "override"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorten_path() {
        let home = Path::new("/home/user");
        assert_eq!(
            shorten_path(Path::new("/home/user/work"), Some(home)),
            "~/work"
        );
        assert_eq!(shorten_path(Path::new("/home/user"), Some(home)), "~");
        assert_eq!(shorten_path(Path::new("/etc/hosts"), Some(home)), "/etc/hosts");
        assert_eq!(shorten_path(Path::new("/etc/hosts"), None), "/etc/hosts");
    }

    #[test]
    fn test_truncate_value() {
        assert_eq!(truncate_value("short", 10), "short");
        assert_eq!(truncate_value("0123456789abc", 10), "0123456...");
    }

    #[test]
    fn test_detect_path_action() {
        assert_eq!(detect_path_action("", "/new"), "set");
        assert_eq!(detect_path_action("/old", "/new:/old"), "prepend");
        assert_eq!(detect_path_action("/old", "/old:/new"), "append");
        assert_eq!(detect_path_action("/old", "/pre:/old:/post"), "modify");
        assert_eq!(detect_path_action("/old", "/entirely/new"), "override");
    }
}
