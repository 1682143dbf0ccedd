//! `cascade check <file>` - query the allow status of a script.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use cascade_core::auth::{AllowStatus, Store};
use cascade_core::{Config, Envrc};

/// Exit 0 if the script is allowed, non-zero otherwise. With `silent` only
/// the exit code speaks.
pub fn run(file: &Path, config: &Config, silent: bool) -> Result<()> {
    let rc = match Envrc::new(file) {
        Ok(rc) => rc,
        Err(e) => {
            if !silent {
                eprintln!("error: {e}");
            }
            return Err(e.into());
        },
    };

    let store = Store::new().context("create allow store")?;
    let status = store.check_with_whitelist(&rc, Some(config));

    if !silent {
        println!("{status}: {}", rc.path.display());
    }

    match status {
        AllowStatus::Allowed => Ok(()),
        AllowStatus::NotAllowed => Err(anyhow!("not allowed")),
        AllowStatus::Denied => Err(anyhow!("denied")),
    }
}
