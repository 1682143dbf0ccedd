//! `cascade allow [path]` - allow a script, or trust a subtree with `-r`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use cascade_core::auth::Store;
use cascade_core::Envrc;

/// Allow a single script by content hash, or with `recursive` trust the
/// whole subtree.
pub fn run(path: Option<&Path>, recursive: bool) -> Result<()> {
    let store = Store::new().context("create allow store")?;

    if recursive {
        let path = path.unwrap_or(Path::new("."));
        let trusted = store.trust_subtree(path).context("trust subtree")?;
        println!("cascade: trusted subtree {}", trusted.display());
        return Ok(());
    }

    let path = path.unwrap_or(Path::new(".envrc"));
    let rc = Envrc::new(path).context("read file")?;
    if !rc.exists {
        bail!("file does not exist: {}", rc.path.display());
    }

    store.allow(&rc).context("allow file")?;
    println!("cascade: allowed {}", rc.path.display());
    Ok(())
}
