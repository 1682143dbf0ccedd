//! `cascade migrate` - import the direnv allow list and check scripts for
//! patterns that behave differently under cascade.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use cascade_core::auth::Store;
use cascade_core::Envrc;
use regex::Regex;

use super::home_dir;

/// A script pattern that may not work after migration.
struct IncompatiblePattern {
    pattern: Regex,
    warning: &'static str,
}

fn incompatible_patterns() -> &'static [IncompatiblePattern] {
    static PATTERNS: OnceLock<Vec<IncompatiblePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"\buse_nix\b",
                "use_nix is not supported - consider using nix-direnv or mise",
            ),
            (
                r"\buse_flake\b",
                "use_flake is not supported - consider using nix-direnv",
            ),
            (
                r"\blayout\s+python",
                "layout python may work differently - test after migration",
            ),
            (
                r"\blayout\s+ruby",
                "layout ruby may work differently - test after migration",
            ),
            (
                r"\blayout\s+node",
                "layout node may work differently - test after migration",
            ),
            (
                r"\bsource_up\b",
                "source_up is handled automatically by cascade - remove this line",
            ),
            (
                r"\bDIRENV_",
                "DIRENV_* variables should be changed to CASCADE_*",
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, warning)| {
            Regex::new(pattern)
                .ok()
                .map(|pattern| IncompatiblePattern { pattern, warning })
        })
        .collect()
    })
}

struct MigrationResult {
    path: PathBuf,
    migrated: bool,
    reason: Option<String>,
}

struct CompatibilityWarning {
    path: PathBuf,
    line: usize,
    warning: &'static str,
}

/// Run the migration.
pub fn run(dry_run: bool, check_only: bool) -> Result<()> {
    let Some(direnv_dir) = find_direnv_data_dir() else {
        bail!(
            "direnv data directory not found (checked $XDG_DATA_HOME/direnv and ~/.local/share/direnv)"
        );
    };

    println!("Cascade Migration Report");
    println!("========================");
    println!();
    println!("Direnv data directory: {}", direnv_dir.display());
    println!();

    let allowed_paths = read_direnv_allow_list(&direnv_dir).context("read direnv allow list")?;
    if allowed_paths.is_empty() {
        println!("No allowed files found in direnv.");
        return Ok(());
    }

    println!("Allowed files found: {}", allowed_paths.len());

    let store = if check_only {
        None
    } else {
        Some(Store::new().context("create allow store")?)
    };

    let mut results = Vec::new();
    let mut warnings = Vec::new();

    for path in allowed_paths {
        let rc = match Envrc::new(&path) {
            Ok(rc) => rc,
            Err(e) => {
                results.push(MigrationResult {
                    path,
                    migrated: false,
                    reason: Some(format!("error: {e}")),
                });
                continue;
            },
        };

        if !rc.exists {
            results.push(MigrationResult {
                path,
                migrated: false,
                reason: Some("file not found".to_string()),
            });
            continue;
        }

        warnings.extend(check_compatibility(&rc.path));

        if let Some(store) = &store {
            if !dry_run {
                if let Err(e) = store.allow(&rc) {
                    results.push(MigrationResult {
                        path,
                        migrated: false,
                        reason: Some(format!("allow failed: {e}")),
                    });
                    continue;
                }
            }
        }

        results.push(MigrationResult {
            path,
            migrated: true,
            reason: None,
        });
    }

    print_results(&results, dry_run, check_only);

    if !warnings.is_empty() {
        println!();
        println!("Compatibility warnings:");
        print_warnings(&warnings);
    }

    print_summary(&results, &warnings, dry_run, check_only);
    Ok(())
}

fn find_direnv_data_dir() -> Option<PathBuf> {
    if let Some(data_home) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        let candidate = PathBuf::from(data_home).join("direnv");
        if candidate.is_dir() {
            return Some(candidate);
        }
    }

    let candidate = home_dir()?.join(".local").join("share").join("direnv");
    candidate.is_dir().then_some(candidate)
}

/// Each file under direnv's `allow/` holds the path of an allowed script.
fn read_direnv_allow_list(direnv_dir: &Path) -> Result<Vec<PathBuf>> {
    let allow_dir = direnv_dir.join("allow");

    let entries = match std::fs::read_dir(&allow_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("read allow directory"),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.context("read allow directory")?;
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let path = content.trim();
        if !path.is_empty() {
            paths.push(PathBuf::from(path));
        }
    }

    paths.sort();
    Ok(paths)
}

fn check_compatibility(path: &Path) -> Vec<CompatibilityWarning> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut warnings = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        for pattern in incompatible_patterns() {
            if pattern.pattern.is_match(line) {
                warnings.push(CompatibilityWarning {
                    path: path.to_path_buf(),
                    line: line_idx + 1,
                    warning: pattern.warning,
                });
            }
        }
    }
    warnings
}

fn print_results(results: &[MigrationResult], dry_run: bool, check_only: bool) {
    for result in results {
        if result.migrated {
            let action = if dry_run {
                "would migrate"
            } else if check_only {
                "found"
            } else {
                "migrated"
            };
            println!("  \u{2713} {} ({action})", result.path.display());
        } else {
            let reason = result.reason.as_deref().unwrap_or("skipped");
            println!("  \u{26a0} {} ({reason} - skipped)", result.path.display());
        }
    }
}

fn print_warnings(warnings: &[CompatibilityWarning]) {
    let mut last_path: Option<&Path> = None;
    for warning in warnings {
        if last_path != Some(warning.path.as_path()) {
            println!("  {}:", warning.path.display());
            last_path = Some(warning.path.as_path());
        }
        println!("    Line {}: {}", warning.line, warning.warning);
    }
}

fn print_summary(
    results: &[MigrationResult],
    warnings: &[CompatibilityWarning],
    dry_run: bool,
    check_only: bool,
) {
    let migrated = results.iter().filter(|r| r.migrated).count();
    let skipped = results.len() - migrated;

    println!();
    println!("Summary:");

    if dry_run {
        println!("  Would migrate: {migrated} files");
    } else if check_only {
        println!("  Found: {migrated} files");
    } else {
        println!("  Migrated: {migrated} files");
    }

    if skipped > 0 {
        println!("  Skipped: {skipped} files (not found or errors)");
    }
    if !warnings.is_empty() {
        println!("  Warnings: {} compatibility issues", warnings.len());
    }

    if !check_only && !dry_run && migrated > 0 {
        println!();
        println!("Next steps:");
        println!("1. Add 'eval \"$(cascade hook bash)\"' to your ~/.bashrc");
        println!("2. Remove 'eval \"$(direnv hook bash)\"' from your ~/.bashrc");
        if !warnings.is_empty() {
            println!("3. Review and fix compatibility warnings above");
        }
    }
}
