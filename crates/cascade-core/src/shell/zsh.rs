//! Zsh dialect.
//!
//! Zsh shares bash's export/unset syntax; only the hook differs. Both
//! `chpwd` and `precmd` fire when the user runs `cd`, which would run the
//! hook twice per prompt. A prompt sequence counter
//! (`_cascade_prompt_seq`), incremented by a dedicated precmd function,
//! lets the hook compare `_cascade_last_run` against the current sequence
//! and skip the second firing.

use std::path::Path;

use super::{render_sh_dump, render_sh_export, Shell, ShellExport};
use crate::env::Env;

/// The [`Shell`] implementation for zsh.
pub struct Zsh;

impl Shell for Zsh {
    fn name(&self) -> &'static str {
        "zsh"
    }

    fn hook(&self, self_path: &Path) -> String {
        format!(
            r#"_cascade_precmd_seq() {{ (( ++_cascade_prompt_seq )) }}

_cascade_hook() {{
  [[ "$_cascade_last_run" == "$_cascade_prompt_seq" ]] && return
  _cascade_last_run=$_cascade_prompt_seq

  trap -- '' SIGINT
  eval "$("{self_path}" export zsh)"
  trap - SIGINT
}}

typeset -ag precmd_functions
if (( ! ${{precmd_functions[(I)_cascade_precmd_seq]}} )); then
  precmd_functions=(_cascade_precmd_seq $precmd_functions)
fi
if (( ! ${{precmd_functions[(I)_cascade_hook]}} )); then
  precmd_functions+=(_cascade_hook)
fi
typeset -ag chpwd_functions
if (( ! ${{chpwd_functions[(I)_cascade_hook]}} )); then
  chpwd_functions=(_cascade_hook $chpwd_functions)
fi
"#,
            self_path = self_path.display()
        )
    }

    fn export(&self, export: &ShellExport) -> String {
        render_sh_export(export)
    }

    fn dump(&self, env: &Env) -> String {
        render_sh_dump(env)
    }
}
