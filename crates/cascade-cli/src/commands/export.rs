//! `cascade export <shell>` - the per-prompt pipeline.
//!
//! Reads the prior session diff from `CASCADE_DIFF`, discovers and
//! authorizes the `.envrc` chain, evaluates the allowed scripts in order,
//! and prints the shell commands that move the session from its baseline to
//! the new environment. Every outcome leaves the shell in a well-defined
//! state: either the newly configured environment or the reverted baseline
//! with the `CASCADE_*` session variables unset.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use cascade_core::auth::{AllowStatus, Store};
use cascade_core::env::{EnvDiff, WatchList};
use cascade_core::eval::Cache;
use cascade_core::shell::{Shell, ShellExport};
use cascade_core::{envrc, state, Config, Env, Evaluator};

use super::Colorizer;

/// Session variables exported to (and later read back from) the shell.
const SESSION_VARS: [&str; 4] = [
    "CASCADE_DIFF",
    "CASCADE_DIR",
    "CASCADE_FILE",
    "CASCADE_WATCHES",
];

/// Run the export pipeline and print one shell transcript.
pub fn run(shell_name: &str, config: &Config, stdlib: &str, no_cache: bool) -> Result<()> {
    let Some(sh) = cascade_core::shell::get(shell_name) else {
        bail!(
            "unsupported shell: {shell_name} (supported: {})",
            cascade_core::shell::supported().join(", ")
        );
    };

    let current_env = Env::current();

    // Prior session diff; malformed means warn and treat as absent.
    let prev_diff = match std::env::var("CASCADE_DIFF") {
        Ok(encoded) if !encoded.is_empty() => match EnvDiff::unmarshal(&encoded) {
            Ok(diff) => Some(diff),
            Err(e) => {
                eprintln!("cascade: warning: invalid CASCADE_DIFF, ignoring: {e}");
                None
            },
        },
        _ => None,
    };

    let root = config.cascade_root().context("get cascade root")?;
    let cwd = std::env::current_dir().context("get working directory")?;

    // Outside the root the chain degrades to the working directory alone.
    let chain = match envrc::find_chain(&root, &cwd) {
        Ok(chain) => chain,
        Err(_) => envrc::find_chain(&cwd, &cwd).context("find envrc chain")?,
    };

    let existing = envrc::existing_only(&chain);
    tracing::debug!(
        chain_len = chain.len(),
        existing = existing.len(),
        "discovered envrc chain"
    );

    if existing.is_empty() {
        return handle_no_envrc(sh, config, prev_diff.as_ref(), None, &[]);
    }

    let store = Store::new().context("create allow store")?;

    let mut allowed = Vec::new();
    let mut not_allowed = Vec::new();
    let mut denied = Vec::new();
    for rc in existing {
        match store.check_with_whitelist(&rc, Some(config)) {
            AllowStatus::Allowed => allowed.push(rc),
            AllowStatus::NotAllowed => not_allowed.push(rc),
            AllowStatus::Denied => denied.push(rc),
        }
    }

    if !denied.is_empty() {
        // State store is best effort here; reverting matters more.
        let state_store = state::Store::new().ok();

        let denied_paths: Vec<PathBuf> = denied.iter().map(|rc| rc.path.clone()).collect();
        for rc in &denied {
            eprintln!(
                "cascade: error: {path} is blocked. Run `cascade allow {path}` to unblock.",
                path = rc.path.display()
            );
        }
        return handle_no_envrc(
            sh,
            config,
            prev_diff.as_ref(),
            state_store.as_ref(),
            &denied_paths,
        );
    }

    for rc in &not_allowed {
        eprintln!(
            "cascade: {path} is not allowed. Run `cascade allow {path}` to allow.",
            path = rc.path.display()
        );
    }

    if allowed.is_empty() {
        return handle_no_envrc(sh, config, prev_diff.as_ref(), None, &[]);
    }

    let self_path = std::env::current_exe().context("get executable path")?;
    let mut evaluator = Evaluator::new(config.bash_path.as_deref(), stdlib, self_path)
        .context("create evaluator")?;

    if config.cache_enabled && !no_cache {
        match Cache::new() {
            Ok(cache) => evaluator = evaluator.with_cache(cache),
            Err(e) => eprintln!("cascade: warning: cache unavailable: {e}"),
        }
    }

    // Baseline: the current env with the prior diff reversed back out.
    let mut working_env = current_env.filtered();
    if let Some(prev) = &prev_diff {
        working_env = prev.reverse().apply(&working_env);
    }
    let base_env = working_env.clone();

    // Evaluate the chain root-first, threading the env through. Any failure
    // aborts the sequence and falls back to the revert path.
    let mut extra_watches = Vec::new();
    for rc in &allowed {
        match evaluator.evaluate(rc, &working_env) {
            Ok(result) => {
                working_env = result.env;
                extra_watches.extend(result.extra_watches);
            },
            Err(e) => {
                eprintln!("cascade: error evaluating {}: {e}", rc.path.display());
                return handle_no_envrc(sh, config, prev_diff.as_ref(), None, &[]);
            },
        }
    }

    let new_diff = EnvDiff::build(&base_env, &working_env);
    let Some(leaf) = allowed.last() else {
        // Unreachable: the empty case returned above.
        return handle_no_envrc(sh, config, prev_diff.as_ref(), None, &[]);
    };

    // Log the change summary only when something observable moved: a new
    // leaf directory, or a diff with a different effect than last prompt.
    let prev_dir = std::env::var_os("CASCADE_DIR").map(PathBuf::from);
    let dir_changed = prev_dir.as_deref() != Some(leaf.dir.as_path());
    let diff_changed = match &prev_diff {
        Some(prev) => !new_diff.equal_effect(prev),
        None => !new_diff.next.is_empty(),
    };
    if config.log_env_diff && (dir_changed || diff_changed) {
        log_env_diff(&new_diff, false);
    }

    let diff_str = new_diff.marshal().context("marshal diff")?;

    let mut export = ShellExport::new();
    for (key, value) in &new_diff.next {
        if value.is_empty() {
            export.unset(key.clone());
        } else {
            export.set(key.clone(), value.clone());
        }
    }

    // Always set CASCADE_DIFF, even when empty: it marks the session active.
    export.set("CASCADE_DIFF", diff_str);
    export.set("CASCADE_DIR", leaf.dir.display().to_string());
    export.set("CASCADE_FILE", leaf.path.display().to_string());

    let mut watch_paths: Vec<PathBuf> = allowed.iter().map(|rc| rc.path.clone()).collect();
    watch_paths.extend(extra_watches);
    let watch_list = WatchList::new(&watch_paths);
    if let Ok(encoded) = watch_list.serialize() {
        if !encoded.is_empty() {
            export.set("CASCADE_WATCHES", encoded);
        }
    }

    print!("{}", sh.export(&export));

    // Persist the applied diff so a later deny or removal can still revert
    // even if the shell loses CASCADE_DIFF.
    match state::Store::new() {
        Ok(state_store) => {
            if let Err(e) = state_store.save(&leaf.path, &leaf.content_hash, &new_diff) {
                eprintln!("cascade: warning: failed to save state: {e}");
            }
        },
        Err(e) => eprintln!("cascade: warning: state storage unavailable: {e}"),
    }

    Ok(())
}

/// The revert path: no scripts apply (none exist, none allowed, or some
/// denied). Restores the baseline using the session diff, falling back to
/// persistent state for denied scripts, and clears the session variables.
fn handle_no_envrc(
    sh: &dyn Shell,
    config: &Config,
    prev_diff: Option<&EnvDiff>,
    state_store: Option<&state::Store>,
    denied_paths: &[PathBuf],
) -> Result<()> {
    if let Some(prev) = prev_diff {
        if !prev.is_empty() {
            return revert_and_cleanup(sh, config, prev, state_store, denied_paths);
        }
    }

    // The session diff is gone; for denied scripts the persistent record
    // still knows what was applied.
    if let Some(store) = state_store {
        for path in denied_paths {
            if let Ok(Some(saved)) = store.load(path) {
                if !saved.diff.is_empty() {
                    return revert_and_cleanup(sh, config, &saved.diff, state_store, denied_paths);
                }
            }
        }
    }

    if !denied_paths.is_empty() {
        eprintln!("cascade: warning: cannot determine variables set by denied files");
        eprintln!(
            "cascade: warning: environment may contain stale variables. Consider restarting your shell."
        );
    }

    Ok(())
}

/// Emit the transcript that reverses `diff` and unsets the session
/// variables, then drop the consumed state records.
fn revert_and_cleanup(
    sh: &dyn Shell,
    config: &Config,
    diff: &EnvDiff,
    state_store: Option<&state::Store>,
    denied_paths: &[PathBuf],
) -> Result<()> {
    if config.log_env_diff {
        log_env_diff(diff, true);
    }

    let mut export = ShellExport::new();
    for (key, value) in &diff.reverse().next {
        if value.is_empty() {
            export.unset(key.clone());
        } else {
            export.set(key.clone(), value.clone());
        }
    }

    for var in SESSION_VARS {
        export.unset(var);
    }

    print!("{}", sh.export(&export));

    if let Some(store) = state_store {
        for path in denied_paths {
            let _ = store.delete(path);
        }
    }

    Ok(())
}

/// One-line stderr summary: `cascade export: +ADDED ~CHANGED -REMOVED`.
fn log_env_diff(diff: &EnvDiff, unloading: bool) {
    if diff.is_empty() {
        return;
    }

    let c = Colorizer::stderr();
    let mut parts = Vec::with_capacity(diff.next.len());

    for (key, new_val) in &diff.next {
        let old_val = diff.prev.get(key).map(String::as_str).unwrap_or("");
        let part = if old_val.is_empty() && !new_val.is_empty() {
            c.green(&format!("+{key}"))
        } else if !old_val.is_empty() && new_val.is_empty() {
            c.red(&format!("-{key}"))
        } else {
            c.yellow(&format!("~{key}"))
        };
        parts.push(part);
    }

    if !parts.is_empty() {
        let prefix = if unloading {
            "cascade unloading:"
        } else {
            "cascade export:"
        };
        eprintln!("{prefix} {}", parts.join(" "));
    }
}
