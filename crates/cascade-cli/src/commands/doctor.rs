//! `cascade doctor` - read-only diagnostics for the installation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use cascade_core::{config, shell, Config};
use regex::Regex;

use super::{home_dir, Colorizer};

enum Severity {
    Ok,
    Warn,
    Error,
    Skip,
}

struct CheckResult {
    name: String,
    severity: Severity,
    message: String,
    detail: Option<String>,
}

impl CheckResult {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            severity: Severity::Ok,
            message: String::new(),
            detail: None,
        }
    }

    fn ok(mut self, message: impl Into<String>) -> Self {
        self.severity = Severity::Ok;
        self.message = message.into();
        self
    }

    fn warn(mut self, message: impl Into<String>) -> Self {
        self.severity = Severity::Warn;
        self.message = message.into();
        self
    }

    fn error(mut self, message: impl Into<String>) -> Self {
        self.severity = Severity::Error;
        self.message = message.into();
        self
    }

    fn skip(mut self, message: impl Into<String>) -> Self {
        self.severity = Severity::Skip;
        self.message = message.into();
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Run every check and exit non-zero iff any is error-severity.
pub fn run(config: &Config) -> Result<()> {
    let c = Colorizer::stdout();
    println!("{}\n", c.bold("Cascade Doctor"));

    let mut results = vec![
        check_bash_version(config),
        check_data_directory(),
        check_config_file(),
        check_cache_directory(config),
    ];
    results.extend(check_shell_hooks(config));
    results.push(check_cascade_root(config));

    let mut warnings = 0;
    let mut errors = 0;
    for result in &results {
        let icon = match result.severity {
            Severity::Ok => c.green("\u{2713}"),
            Severity::Warn => {
                warnings += 1;
                c.yellow("!")
            },
            Severity::Error => {
                errors += 1;
                c.red("\u{2717}")
            },
            Severity::Skip => c.dim("\u{25cb}"),
        };

        println!("  {icon} {}: {}", result.name, result.message);
        if let Some(detail) = &result.detail {
            for line in detail.lines() {
                println!("      {}", c.dim(line));
            }
        }
    }

    println!();

    if errors > 0 {
        println!(
            "{} Found {errors} error(s) and {warnings} warning(s)",
            c.red("\u{2717}")
        );
        bail!("doctor found {errors} error(s)");
    } else if warnings > 0 {
        println!(
            "{} Found {warnings} warning(s), but cascade should work",
            c.yellow("!")
        );
    } else {
        println!("{} All checks passed", c.green("\u{2713}"));
    }

    Ok(())
}

fn check_bash_version(config: &Config) -> CheckResult {
    let result = CheckResult::new("Bash version");

    let bash_path = match &config.bash_path {
        Some(path) => path.clone(),
        None => match find_in_path("bash") {
            Some(path) => path,
            None => return result.error("bash not found in PATH"),
        },
    };

    let output = match std::process::Command::new(&bash_path).arg("--version").output() {
        Ok(output) => output,
        Err(e) => return result.error(format!("failed to run bash: {e}")),
    };
    let text = String::from_utf8_lossy(&output.stdout);

    // "GNU bash, version X.Y.Z..."
    let Ok(version_re) = Regex::new(r"version (\d+)\.(\d+)") else {
        return result.warn("could not parse bash version");
    };
    let Some(caps) = version_re.captures(&text) else {
        let first_line = text.lines().next().unwrap_or("").trim().to_string();
        return result
            .warn("could not parse bash version")
            .with_detail(first_line);
    };

    let major: u32 = caps[1].parse().unwrap_or(0);
    let version = format!("{}.{}", &caps[1], &caps[2]);

    // Associative arrays need 4.0+.
    if major < 4 {
        return result
            .error(format!("bash {version} is too old (requires 4.0+)"))
            .with_detail("Upgrade bash or set bash_path in config to a newer version");
    }

    result.ok(format!("bash {version} ({})", bash_path.display()))
}

fn check_data_directory() -> CheckResult {
    let result = CheckResult::new("Data directory");

    let data_home = match std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => match home_dir() {
            Some(home) => home.join(".local").join("share"),
            None => return result.error("could not determine home directory"),
        },
    };

    let cascade_dir = data_home.join("cascade");

    let meta = match std::fs::metadata(&cascade_dir) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return result.ok(format!(
                "{} (will be created on first use)",
                cascade_dir.display()
            ));
        },
        Err(e) => return result.error(format!("cannot access {}: {e}", cascade_dir.display())),
        Ok(meta) => meta,
    };

    if !meta.is_dir() {
        return result.error(format!(
            "{} exists but is not a directory",
            cascade_dir.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o022 != 0 {
            return result
                .warn(format!(
                    "{} has permissive permissions ({mode:o})",
                    cascade_dir.display()
                ))
                .with_detail(format!("Consider: chmod 700 {}", cascade_dir.display()));
        }
    }

    let existing: Vec<&str> = ["allow", "deny", "trust"]
        .into_iter()
        .filter(|sub| cascade_dir.join(sub).exists())
        .collect();

    if existing.is_empty() {
        result.ok(cascade_dir.display().to_string())
    } else {
        result.ok(format!("{} ({})", cascade_dir.display(), existing.join(", ")))
    }
}

fn check_config_file() -> CheckResult {
    let result = CheckResult::new("Config file");
    match config::config_file() {
        // Loading already succeeded in main, so presence means validity.
        Some(path) => result.ok(path.display().to_string()),
        None => result.ok("no config file (using defaults)"),
    }
}

fn check_cache_directory(config: &Config) -> CheckResult {
    let result = CheckResult::new("Cache directory");

    if !config.cache_enabled {
        return result.ok("caching disabled");
    }

    let cache_home = match std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => match home_dir() {
            Some(home) => home.join(".cache"),
            None => return result.error("could not determine home directory"),
        },
    };
    let cache_dir = cache_home.join("cascade");

    let meta = match std::fs::metadata(&cache_dir) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return result.ok(format!(
                "{} (will be created when needed)",
                cache_dir.display()
            ));
        },
        Err(e) => return result.warn(format!("cannot access {}: {e}", cache_dir.display())),
        Ok(meta) => meta,
    };

    if !meta.is_dir() {
        return result.error(format!(
            "{} exists but is not a directory",
            cache_dir.display()
        ));
    }

    match std::fs::read_dir(&cache_dir) {
        Ok(entries) => {
            let count = entries.count();
            result.ok(format!("{} ({count} entries)", cache_dir.display()))
        },
        Err(e) => result.warn(format!("cannot read {}: {e}", cache_dir.display())),
    }
}

fn check_shell_hooks(config: &Config) -> Vec<CheckResult> {
    let current_shell = detect_current_shell();
    let mut results = Vec::new();

    for shell_name in shell::supported() {
        let result = CheckResult::new(format!("Shell hook ({shell_name})"));

        if config.is_shell_disabled(shell_name) {
            results.push(result.skip("disabled in config"));
            continue;
        }

        let Some(rc_path) = shell_rc_path(shell_name) else {
            results.push(result.skip("RC file path unknown"));
            continue;
        };

        let is_current = current_shell.as_deref() == Some(*shell_name);

        let content = match std::fs::read_to_string(&rc_path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let message = format!("{} does not exist", rc_path.display());
                results.push(if is_current {
                    result.warn(message)
                } else {
                    result.skip(message)
                });
                continue;
            },
            Err(e) => {
                results.push(result.warn(format!("cannot read {}: {e}", rc_path.display())));
                continue;
            },
            Ok(content) => content,
        };

        let has_hook = ["cascade hook", "eval \"$(cascade"]
            .iter()
            .any(|pattern| content.contains(pattern));

        results.push(if has_hook {
            result.ok(format!("hook found in {}", rc_path.display()))
        } else if is_current {
            result
                .warn(format!("hook not found in {}", rc_path.display()))
                .with_detail(format!(
                    "Add to {}: eval \"$(cascade hook {shell_name})\"",
                    rc_path.display()
                ))
        } else {
            result.skip(format!(
                "hook not found in {} (not current shell)",
                rc_path.display()
            ))
        });
    }

    results
}

fn check_cascade_root(config: &Config) -> CheckResult {
    let result = CheckResult::new("Cascade root");

    let root = match config.cascade_root() {
        Ok(root) => root,
        Err(e) => return result.error(format!("could not determine cascade root: {e}")),
    };

    let meta = match std::fs::metadata(&root) {
        Ok(meta) => meta,
        Err(_) => return result.error(format!("cascade root does not exist: {}", root.display())),
    };

    if !meta.is_dir() {
        return result.error(format!("cascade root is not a directory: {}", root.display()));
    }

    let source = if config.cascade_root.is_some() {
        "(from config)"
    } else {
        "(default: $HOME)"
    };
    result.ok(format!("{} {source}", root.display()))
}

fn detect_current_shell() -> Option<String> {
    let shell_path = std::env::var("SHELL").ok()?;
    let base = Path::new(&shell_path).file_name()?.to_str()?;
    shell::get(base).map(|sh| sh.name().to_string())
}

fn shell_rc_path(shell_name: &str) -> Option<PathBuf> {
    let home = home_dir()?;
    match shell_name {
        "bash" => {
            let bashrc = home.join(".bashrc");
            if bashrc.exists() {
                Some(bashrc)
            } else {
                Some(home.join(".bash_profile"))
            }
        },
        "zsh" => Some(home.join(".zshrc")),
        "fish" => Some(home.join(".config").join("fish").join("config.fish")),
        _ => None,
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
