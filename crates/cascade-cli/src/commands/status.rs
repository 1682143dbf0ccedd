//! `cascade status` - show chain authorization, current diff, watches, and
//! trusted subtrees.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cascade_core::auth::Store;
use cascade_core::env::{EnvDiff, WatchList};
use cascade_core::{envrc, Config};
use serde::Serialize;

use super::{home_dir, shorten_path, truncate_value, Colorizer};

/// JSON shape of `cascade status --json`.
#[derive(Debug, Serialize)]
struct StatusOutput {
    active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    directory: Option<PathBuf>,
    chain: Vec<ChainEntry>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    variables: std::collections::BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    watches: Vec<WatchEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    trusted_subtrees: Vec<PathBuf>,
}

/// A single script in the chain.
#[derive(Debug, Serialize)]
struct ChainEntry {
    path: PathBuf,
    exists: bool,
    status: String,
}

/// A watched file and its freshness.
#[derive(Debug, Serialize)]
struct WatchEntry {
    path: PathBuf,
    exists: bool,
    changed: bool,
    /// True when added via `watch_file` rather than being an `.envrc`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    extra: bool,
}

/// Render status as human-readable text or JSON.
pub fn run(config: &Config, json: bool) -> Result<()> {
    let status = gather_status(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    print_human(&status);
    Ok(())
}

fn gather_status(config: &Config) -> Result<StatusOutput> {
    let directory = std::env::var_os("CASCADE_DIR").map(PathBuf::from);

    let mut status = StatusOutput {
        active: directory.is_some(),
        directory,
        chain: Vec::new(),
        variables: std::collections::BTreeMap::new(),
        watches: Vec::new(),
        trusted_subtrees: Vec::new(),
    };

    let root = config.cascade_root().context("get cascade root")?;
    let cwd = std::env::current_dir().context("get working directory")?;

    let chain = match envrc::find_chain(&root, &cwd) {
        Ok(chain) => chain,
        Err(_) => envrc::find_chain(&cwd, &cwd).context("find envrc chain")?,
    };

    let store = Store::new().context("create allow store")?;

    for rc in envrc::existing_only(&chain) {
        status.chain.push(ChainEntry {
            status: store.check_with_whitelist(&rc, Some(config)).to_string(),
            exists: rc.exists,
            path: rc.path,
        });
    }

    // Variables currently applied, from the session diff.
    if let Ok(encoded) = std::env::var("CASCADE_DIFF") {
        if let Ok(diff) = EnvDiff::unmarshal(&encoded) {
            for (key, value) in &diff.next {
                if !value.is_empty() {
                    status.variables.insert(key.clone(), value.clone());
                }
            }
        }
    }

    let envrc_paths: BTreeSet<&PathBuf> = status.chain.iter().map(|e| &e.path).collect();

    if let Ok(encoded) = std::env::var("CASCADE_WATCHES") {
        if let Ok(watch_list) = WatchList::parse(&encoded) {
            for ft in &watch_list {
                status.watches.push(WatchEntry {
                    path: ft.path.clone(),
                    exists: ft.exists,
                    changed: ft.check(),
                    extra: !envrc_paths.contains(&ft.path),
                });
            }
        }
    }

    if let Ok(mut trusted) = store.list_trusted_subtrees() {
        trusted.sort();
        status.trusted_subtrees = trusted;
    }

    Ok(status)
}

fn print_human(status: &StatusOutput) {
    let c = Colorizer::stdout();
    let home = home_dir();

    if status.active {
        println!("{}", c.bold("Cascade is active"));
        if let Some(dir) = &status.directory {
            println!("  Directory: {}", dir.display());
        }
    } else {
        println!("{}", c.dim("Cascade is not active"));
    }
    println!();

    if status.chain.is_empty() {
        println!("{}\n", c.dim("No .envrc files found"));
    } else {
        println!("{}", c.bold(".envrc chain:"));
        for entry in &status.chain {
            let (icon, text) = status_icon(&c, &entry.status);
            println!(
                "  {icon} {} ({text})",
                shorten_path(&entry.path, home.as_deref())
            );
        }
        println!();
    }

    if status.active && !status.variables.is_empty() {
        println!("{}", c.bold("Variables set:"));
        let width = status.variables.keys().map(String::len).max().unwrap_or(0);
        for (name, value) in &status.variables {
            println!("  {name:<width$} = {}", truncate_value(value, 50));
        }
        println!();
    }

    if status.active && !status.watches.is_empty() {
        println!("{}", c.bold("Watched files:"));
        for watch in &status.watches {
            let change = if watch.changed {
                c.yellow("changed")
            } else {
                c.dim("unchanged")
            };
            let display = shorten_path(&watch.path, home.as_deref());
            if watch.extra {
                println!("  {display} ({} - {change})", c.dim("extra"));
            } else {
                println!("  {display} ({change})");
            }
        }
        println!();
    }

    if !status.trusted_subtrees.is_empty() {
        println!("{}", c.bold("Trusted subtrees:"));
        for path in &status.trusted_subtrees {
            println!("  {}", shorten_path(path, home.as_deref()));
        }
    }
}

/// Icon and colored text for an authorization status string.
pub(crate) fn status_icon(c: &Colorizer, status: &str) -> (String, String) {
    match status {
        "allowed" => (c.green("\u{2713}"), c.green("allowed")),
        "denied" => (c.red("\u{2717}"), c.red("denied")),
        "not allowed" => (c.yellow("\u{26a0}"), c.yellow("not allowed")),
        other => ("?".to_string(), other.to_string()),
    }
}
