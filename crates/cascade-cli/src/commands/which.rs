//! `cascade which VAR` - identify which script set or modified a variable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use cascade_core::auth::{AllowStatus, Store};
use cascade_core::{envrc, Config, Env, Evaluator};
use serde::Serialize;

use super::{detect_path_action, home_dir, is_path_like_var, shorten_path, Colorizer};

/// JSON shape of `cascade which --json`.
#[derive(Debug, Serialize)]
struct WhichOutput {
    variable: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    value: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    set_by: Vec<SetByEntry>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    not_found: bool,
}

/// One script that touched the variable.
#[derive(Debug, Serialize)]
struct SetByEntry {
    path: PathBuf,
    action: String,
}

/// Trace a variable through the allowed chain.
pub fn run(var_name: &str, config: &Config, stdlib: &str, json: bool) -> Result<()> {
    let output = gather_which(var_name, config, stdlib)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_human(&output);
    Ok(())
}

fn gather_which(var_name: &str, config: &Config, stdlib: &str) -> Result<WhichOutput> {
    let mut output = WhichOutput {
        variable: var_name.to_string(),
        value: String::new(),
        set_by: Vec::new(),
        not_found: false,
    };

    let root = config.cascade_root().context("get cascade root")?;
    let cwd = std::env::current_dir().context("get working directory")?;

    let chain = match envrc::find_chain(&root, &cwd) {
        Ok(chain) => chain,
        Err(_) => envrc::find_chain(&cwd, &cwd).context("find envrc chain")?,
    };

    let existing = envrc::existing_only(&chain);
    if existing.is_empty() {
        output.not_found = true;
        return Ok(output);
    }

    let store = Store::new().context("create allow store")?;
    let allowed: Vec<_> = existing
        .into_iter()
        .filter(|rc| store.check_with_whitelist(rc, Some(config)) == AllowStatus::Allowed)
        .collect();

    if allowed.is_empty() {
        output.not_found = true;
        return Ok(output);
    }

    let self_path = std::env::current_exe().context("get executable path")?;
    let evaluator = Evaluator::new(config.bash_path.as_deref(), stdlib, self_path)
        .context("create evaluator")?;

    let mut working_env = Env::current().filtered();
    let path_like = is_path_like_var(var_name);

    for rc in &allowed {
        let prev_value = working_env.get(var_name).unwrap_or("").to_string();

        let result = match evaluator.evaluate(rc, &working_env) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("cascade: warning: error evaluating {}: {e}", rc.path.display());
                continue;
            },
        };

        let new_value = result.env.get(var_name).unwrap_or("").to_string();
        working_env = result.env;

        if new_value != prev_value {
            let action = if path_like {
                detect_path_action(&prev_value, &new_value)
            } else if prev_value.is_empty() {
                "set"
            } else {
                "override"
            };
            output.set_by.push(SetByEntry {
                path: rc.path.clone(),
                action: action.to_string(),
            });
        }
    }

    output.value = working_env.get(var_name).unwrap_or("").to_string();
    if output.set_by.is_empty() {
        output.not_found = true;
    }

    Ok(output)
}

fn print_human(output: &WhichOutput) {
    let c = Colorizer::stdout();
    let home = home_dir();

    if output.not_found {
        println!("{} is not set by any .envrc file", c.bold(&output.variable));
        if !output.value.is_empty() {
            println!("{}", c.dim("(set by shell or system)"));
        }
        return;
    }

    if output.set_by.len() == 1 {
        println!("{} is set by:", c.bold(&output.variable));
    } else {
        println!("{} is set by multiple files:", c.bold(&output.variable));
    }

    for (i, entry) in output.set_by.iter().enumerate() {
        let display = shorten_path(&entry.path, home.as_deref());
        let action = format_action(&entry.action, i == 0);
        println!("  {display}  {}", c.dim(&format!("({action})")));
    }

    println!();

    if is_path_like_var(&output.variable) {
        println!("{}", c.bold("Current value:"));
        for part in output.value.split(':') {
            println!("  {}", shorten_path(std::path::Path::new(part), home.as_deref()));
        }
    } else if output.value.contains(char::is_whitespace) {
        println!("{} {:?}", c.bold("Value:"), output.value);
    } else {
        println!("{} {}", c.bold("Value:"), output.value);
    }
}

fn format_action(action: &str, is_first: bool) -> &'static str {
    match action {
        "set" => {
            if is_first {
                "base value"
            } else {
                "set"
            }
        },
        "prepend" => "prepended",
        "append" => "appended",
        "override" => "overrides",
        "modify" => "modified",
        _ => "changed",
    }
}
