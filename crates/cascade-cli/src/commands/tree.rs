//! `cascade tree [VAR...]` - render the chain and per-level variable
//! changes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cascade_core::auth::{AllowStatus, Store};
use cascade_core::{env, envrc, Config, Env, Envrc, Evaluator};
use serde::Serialize;

use super::status::status_icon;
use super::{
    detect_path_action, home_dir, is_path_like_var, shorten_path, shorten_path_list,
    truncate_value, Colorizer,
};

/// JSON shape of `cascade tree --json`.
#[derive(Debug, Serialize)]
struct TreeOutput {
    root: PathBuf,
    current: PathBuf,
    levels: Vec<TreeLevel>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    final_values: BTreeMap<String, String>,
}

/// A single directory level in the chain.
#[derive(Debug, Serialize)]
struct TreeLevel {
    path: PathBuf,
    dir: PathBuf,
    exists: bool,
    /// Authorization status; empty for levels without a script.
    status: String,
    is_current: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    variables: Vec<VarEntry>,
}

/// A variable change at one level.
#[derive(Debug, Serialize)]
struct VarEntry {
    name: String,
    action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    value: String,
}

/// Render the cascade tree.
pub fn run(
    filter_vars: &[String],
    config: &Config,
    stdlib: &str,
    json: bool,
    show_values: bool,
) -> Result<()> {
    let output = gather_tree(filter_vars, config, stdlib, show_values)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_human(&output, filter_vars, show_values);
    Ok(())
}

fn gather_tree(
    filter_vars: &[String],
    config: &Config,
    stdlib: &str,
    show_values: bool,
) -> Result<TreeOutput> {
    let root = config.cascade_root().context("get cascade root")?;
    let cwd = std::env::current_dir().context("get working directory")?;

    let (chain, root) = match envrc::find_chain(&root, &cwd) {
        Ok(chain) => (chain, root),
        Err(_) => (
            envrc::find_chain(&cwd, &cwd).context("find envrc chain")?,
            cwd.clone(),
        ),
    };

    let mut output = TreeOutput {
        root,
        current: cwd.clone(),
        levels: Vec::new(),
        final_values: BTreeMap::new(),
    };

    let store = Store::new().context("create allow store")?;

    let mut allowed = Vec::new();
    let mut level_index = BTreeMap::new();

    for rc in chain {
        let mut level = TreeLevel {
            path: rc.path.clone(),
            dir: rc.dir.clone(),
            exists: rc.exists,
            status: String::new(),
            is_current: rc.dir == cwd,
            variables: Vec::new(),
        };

        if rc.exists {
            let status = store.check_with_whitelist(&rc, Some(config));
            level.status = status.to_string();
            if status == AllowStatus::Allowed {
                level_index.insert(rc.path.clone(), output.levels.len());
                allowed.push(rc);
            }
        }

        output.levels.push(level);
    }

    if !allowed.is_empty() {
        match evaluate_levels(config, stdlib, &allowed, show_values) {
            Ok(per_level) => {
                let mut final_env = None;
                for (path, vars, env_after) in per_level {
                    if let Some(idx) = level_index.get(&path) {
                        output.levels[*idx].variables = vars;
                    }
                    final_env = Some(env_after);
                }
                if !filter_vars.is_empty() {
                    if let Some(final_env) = final_env {
                        for var in filter_vars {
                            if let Some(value) = final_env.get(var) {
                                output.final_values.insert(var.clone(), value.to_string());
                            }
                        }
                    }
                    for level in &mut output.levels {
                        level
                            .variables
                            .retain(|entry| filter_vars.contains(&entry.name));
                    }
                }
            },
            Err(e) => {
                eprintln!("cascade: warning: error evaluating variables: {e}");
            },
        }
    }

    Ok(output)
}

/// Evaluate each allowed script in chain order and record the variables it
/// changed. Returns `(path, changes, env_after)` per script.
#[allow(clippy::type_complexity)]
fn evaluate_levels(
    config: &Config,
    stdlib: &str,
    allowed: &[Envrc],
    show_values: bool,
) -> Result<Vec<(PathBuf, Vec<VarEntry>, Env)>> {
    let self_path = std::env::current_exe().context("get executable path")?;
    let evaluator = Evaluator::new(config.bash_path.as_deref(), stdlib, self_path)
        .context("create evaluator")?;

    let mut working_env = Env::current().filtered();
    let mut results = Vec::with_capacity(allowed.len());

    for rc in allowed {
        let before = working_env.clone();
        match evaluator.evaluate(rc, &working_env) {
            Ok(result) => {
                let vars = detect_changes(&before, &result.env, show_values);
                working_env = result.env;
                results.push((rc.path.clone(), vars, working_env.clone()));
            },
            Err(e) => {
                eprintln!("cascade: warning: error evaluating {}: {e}", rc.path.display());
            },
        }
    }

    Ok(results)
}

fn detect_changes(before: &Env, after: &Env, show_values: bool) -> Vec<VarEntry> {
    let mut entries = Vec::new();

    for (key, new_val) in after.iter() {
        if env::is_ignored(key) {
            continue;
        }

        let action = match before.get(key) {
            None => "set",
            Some(old_val) if old_val != new_val.as_str() => {
                if is_path_like_var(key) {
                    detect_path_action(old_val, new_val)
                } else {
                    "override"
                }
            },
            Some(_) => continue,
        };

        entries.push(VarEntry {
            name: key.clone(),
            action: action.to_string(),
            value: if show_values {
                new_val.clone()
            } else {
                String::new()
            },
        });
    }

    for (key, _) in before.iter() {
        if env::is_ignored(key) {
            continue;
        }
        if !after.contains_key(key) {
            entries.push(VarEntry {
                name: key.clone(),
                action: "unset".to_string(),
                value: String::new(),
            });
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

fn print_human(output: &TreeOutput, filter_vars: &[String], show_values: bool) {
    let c = Colorizer::stdout();
    let home = home_dir();

    let existing: Vec<&TreeLevel> = output.levels.iter().filter(|l| l.exists).collect();
    if existing.is_empty() {
        println!("{}", c.dim("No .envrc files found in cascade chain"));
        return;
    }

    for level in existing {
        let mut display_dir = shorten_path(&level.dir, home.as_deref());
        if level.is_current {
            display_dir = format!("{display_dir} {}", c.dim("<- current"));
        }
        println!("{display_dir}");

        let (icon, text) = status_icon(&c, &level.status);
        let file_name = level
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if level.variables.is_empty() {
            println!("\u{2514}\u{2500}\u{2500} {file_name} {icon} {text}");
        } else {
            println!("\u{251c}\u{2500}\u{2500} {file_name} {icon} {text}");
            print_variables(&c, &level.variables, show_values, home.as_deref());
        }
        println!();
    }

    if !filter_vars.is_empty() && !output.final_values.is_empty() {
        print_final_values(&c, &output.final_values, filter_vars, home.as_deref());
    }
}

fn print_variables(
    c: &Colorizer,
    vars: &[VarEntry],
    show_values: bool,
    home: Option<&std::path::Path>,
) {
    for (i, var) in vars.iter().enumerate() {
        let connector = if i == vars.len() - 1 {
            "\u{2514}\u{2500}\u{2500}"
        } else {
            "\u{251c}\u{2500}\u{2500}"
        };

        let symbol = action_symbol(&var.action);

        if show_values && !var.value.is_empty() {
            let display = if is_path_like_var(&var.name) {
                shorten_path_list(&var.value, home)
            } else {
                shorten_path(std::path::Path::new(&var.value), home)
            };
            let display = truncate_value(&display, 60);
            println!(
                "\u{2502}   {connector} {} {} {}",
                c.cyan(&var.name),
                c.dim(symbol),
                c.dim(&display)
            );
        } else {
            println!(
                "\u{2502}   {connector} {} {}",
                c.cyan(&var.name),
                c.dim(symbol)
            );
        }
    }
}

fn print_final_values(
    c: &Colorizer,
    final_values: &BTreeMap<String, String>,
    filter_vars: &[String],
    home: Option<&std::path::Path>,
) {
    println!("{}", c.bold("Final values:"));

    for var in filter_vars {
        let Some(value) = final_values.get(var) else {
            println!("  {} {}", c.cyan(var), c.dim("(not set)"));
            continue;
        };

        let display = if is_path_like_var(var) {
            shorten_path_list(value, home)
        } else {
            shorten_path(std::path::Path::new(value), home)
        };
        let display = truncate_value(&display, 80);

        println!("  {} = {display}", c.cyan(var));
    }
}

fn action_symbol(action: &str) -> &'static str {
    match action {
        "set" => "=",
        "prepend" => "+=",
        "append" => "=+",
        "override" => ":=",
        "modify" => "~=",
        "unset" => "x",
        _ => "?",
    }
}
