//! `cascade hook <shell>` - print the shell integration snippet.

use anyhow::{bail, Context, Result};
use cascade_core::shell;

/// Print the hook snippet that the user evals from their shell rc file.
pub fn run(shell_name: &str) -> Result<()> {
    let Some(sh) = shell::get(shell_name) else {
        bail!(
            "unsupported shell: {shell_name} (supported: {})",
            shell::supported().join(", ")
        );
    };

    let self_path = std::env::current_exe().context("get executable path")?;
    print!("{}", sh.hook(&self_path));
    Ok(())
}
