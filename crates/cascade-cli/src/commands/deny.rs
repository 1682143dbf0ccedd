//! `cascade deny [path]` - deny a script by path.

use std::path::Path;

use anyhow::{Context, Result};
use cascade_core::auth::Store;
use cascade_core::Envrc;

/// Deny a script. The file does not have to exist: denying a removed
/// script keeps its path blocked if it reappears.
pub fn run(path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(Path::new(".envrc"));
    let rc = Envrc::new(path).context("read file")?;

    let store = Store::new().context("create allow store")?;
    store.deny(&rc).context("deny file")?;

    println!("cascade: denied {}", rc.path.display());
    Ok(())
}
