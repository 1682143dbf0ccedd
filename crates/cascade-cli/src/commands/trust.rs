//! `cascade trust [path]` - trust, untrust, or list subtrees.

use std::path::Path;

use anyhow::{bail, Context, Result};
use cascade_core::auth::Store;

use super::{home_dir, shorten_path};

/// Dispatch between add, list, and remove forms.
pub fn run(path: Option<&Path>, list: bool, remove: bool) -> Result<()> {
    let store = Store::new().context("create allow store")?;

    if list {
        return run_list(&store);
    }
    if remove {
        return run_remove(path, &store);
    }
    run_add(path, &store)
}

fn run_add(path: Option<&Path>, store: &Store) -> Result<()> {
    let Some(path) = path else {
        bail!("path required");
    };

    let trusted = store.trust_subtree(path).context("trust subtree")?;
    println!("cascade: trusted subtree {}", trusted.display());
    Ok(())
}

fn run_remove(path: Option<&Path>, store: &Store) -> Result<()> {
    let Some(path) = path else {
        bail!("path required");
    };

    let removed = store.untrust_subtree(path).context("untrust subtree")?;
    println!("cascade: removed trust for {}", removed.display());
    Ok(())
}

fn run_list(store: &Store) -> Result<()> {
    let mut paths = store
        .list_trusted_subtrees()
        .context("list trusted subtrees")?;

    if paths.is_empty() {
        println!("No trusted subtrees");
        return Ok(());
    }

    paths.sort();
    let home = home_dir();

    println!("Trusted subtrees:");
    for path in &paths {
        println!("  {}", shorten_path(path, home.as_deref()));
    }

    Ok(())
}
