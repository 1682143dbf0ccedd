//! Bash dialect.

use std::path::Path;

use super::{render_sh_dump, render_sh_export, Shell, ShellExport};
use crate::env::Env;

/// The [`Shell`] implementation for bash.
pub struct Bash;

impl Shell for Bash {
    fn name(&self) -> &'static str {
        "bash"
    }

    /// The hook preserves the user's exit status across the prompt, traps
    /// SIGINT only while evaluating the generated commands, guards against
    /// double registration, and handles `PROMPT_COMMAND` as either a string
    /// or an array (bash 5.1+).
    fn hook(&self, self_path: &Path) -> String {
        format!(
            r#"_cascade_hook() {{
  local previous_exit_status=$?;
  trap -- '' SIGINT;
  eval "$("{self_path}" export bash)";
  trap - SIGINT;
  return $previous_exit_status;
}};
if [[ ";${{PROMPT_COMMAND[*]:-}};" != *";_cascade_hook;"* ]]; then
  if [[ "$(declare -p PROMPT_COMMAND 2>&1)" == "declare -a"* ]]; then
    PROMPT_COMMAND=(_cascade_hook "${{PROMPT_COMMAND[@]}}")
  else
    PROMPT_COMMAND="_cascade_hook${{PROMPT_COMMAND:+;$PROMPT_COMMAND}}"
  fi
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_contains_guard_and_self_path() {
        let hook = Bash.hook(Path::new("/usr/local/bin/cascade"));
        assert!(hook.contains(r#""/usr/local/bin/cascade" export bash"#));
        // Double-registration guard.
        assert!(hook.contains(r#"!= *";_cascade_hook;"*"#));
        // Exit status preservation and SIGINT trap.
        assert!(hook.contains("previous_exit_status=$?"));
        assert!(hook.contains("trap -- '' SIGINT"));
        assert!(hook.contains("trap - SIGINT"));
    }

    #[test]
    fn test_export_set_and_unset() {
        let mut export = ShellExport::new();
        export.set("FOO", "bar baz");
        export.unset("OLD");

        let rendered = Bash.export(&export);
        assert_eq!(rendered, "export FOO=\"bar baz\";\nunset OLD;\n");
    }

    #[test]
    fn test_export_escapes_values() {
        let mut export = ShellExport::new();
        export.set("TRICKY", r#"has "quotes" and $vars"#);

        let rendered = Bash.export(&export);
        assert_eq!(
            rendered,
            "export TRICKY=\"has \\\"quotes\\\" and \\$vars\";\n"
        );
    }

    #[test]
    fn test_dump_sorted() {
        let env = Env::from_host_env(["B=2", "A=1"]);
        assert_eq!(Bash.dump(&env), "export A=\"1\";\nexport B=\"2\";\n");
    }
}
