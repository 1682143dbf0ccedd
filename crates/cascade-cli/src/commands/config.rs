//! `cascade config` - show the effective configuration.

use std::path::PathBuf;

use anyhow::Result;
use cascade_core::{config, Config};
use serde::Serialize;

use super::Colorizer;

/// JSON shape of `cascade config --json`.
#[derive(Debug, Serialize)]
struct ConfigOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    config_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    whitelist_prefix: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bash_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    disabled_shells: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cascade_root: Option<PathBuf>,
    cache_enabled: bool,
    log_env_diff: bool,
}

/// Print the configuration as text or JSON.
pub fn run(cfg: &Config, json: bool) -> Result<()> {
    let output = ConfigOutput {
        config_file: config::config_file(),
        whitelist_prefix: cfg.whitelist_prefix.clone(),
        bash_path: cfg.bash_path.clone(),
        disabled_shells: cfg.disabled_shells.clone(),
        cascade_root: cfg.cascade_root.clone(),
        cache_enabled: cfg.cache_enabled,
        log_env_diff: cfg.log_env_diff,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let c = Colorizer::stdout();
    println!("{}\n", c.bold("Cascade Configuration"));

    match &output.config_file {
        Some(path) => println!("  {} {}", c.cyan("Config file:"), path.display()),
        None => println!("  {} {}", c.cyan("Config file:"), c.dim("(none)")),
    }

    if output.whitelist_prefix.is_empty() {
        println!("  {} {}", c.cyan("Whitelist prefixes:"), c.dim("(none)"));
    } else {
        println!("  {}", c.cyan("Whitelist prefixes:"));
        for prefix in &output.whitelist_prefix {
            println!("    - {}", prefix.display());
        }
    }

    match &output.bash_path {
        Some(path) => println!("  {} {}", c.cyan("Bash path:"), path.display()),
        None => println!("  {} {}", c.cyan("Bash path:"), c.dim("(auto-detect)")),
    }

    if output.disabled_shells.is_empty() {
        println!("  {} {}", c.cyan("Disabled shells:"), c.dim("(none)"));
    } else {
        println!(
            "  {} {}",
            c.cyan("Disabled shells:"),
            output.disabled_shells.join(", ")
        );
    }

    match &output.cascade_root {
        Some(root) => println!("  {} {}", c.cyan("Cascade root:"), root.display()),
        None => println!("  {} {}", c.cyan("Cascade root:"), c.dim("(default: $HOME)")),
    }

    if output.cache_enabled {
        println!("  {} {}", c.cyan("Cache enabled:"), c.green("true"));
    } else {
        println!("  {} {}", c.cyan("Cache enabled:"), c.yellow("false"));
    }

    if output.log_env_diff {
        println!("  {} {}", c.cyan("Log env diff:"), c.green("true"));
    } else {
        println!("  {} {}", c.cyan("Log env diff:"), c.yellow("false"));
    }

    Ok(())
}
