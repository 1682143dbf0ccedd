//! `cascade dump json` - internal child-side environment dump.
//!
//! Invoked by the stdlib's `__dump_at_exit` trap, which redirects stdout to
//! the side-band fd 3. The binary itself just writes JSON to stdout.

use anyhow::{bail, Context, Result};
use cascade_core::Env;

/// Dump the current process environment in the requested format.
pub fn run(format: &str) -> Result<()> {
    if format != "json" {
        bail!("unsupported dump format: {format} (supported: json)");
    }

    let env = Env::current();
    // serde_json performs no HTML escaping, so values survive byte-for-byte.
    let json = serde_json::to_string(&env).context("encode env json")?;
    println!("{json}");
    Ok(())
}
