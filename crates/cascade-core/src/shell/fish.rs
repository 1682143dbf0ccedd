//! Fish dialect.

use std::path::Path;

use super::{fish_escape, Shell, ShellExport};
use crate::env::Env;

/// The [`Shell`] implementation for fish.
pub struct Fish;

impl Shell for Fish {
    fn name(&self) -> &'static str {
        "fish"
    }

    /// Hooks both the prompt event and the `PWD` variable, so `cd`, `pushd`,
    /// and `popd` all trigger an export. Setting
    /// `CASCADE_FISH_MODE=disable_arrow` disables the PWD-triggered path.
    fn hook(&self, self_path: &Path) -> String {
        format!(
            r#"function __cascade_export_eval --on-event fish_prompt
    "{self_path}" export fish | source
end

function __cascade_cd_hook --on-variable PWD
    if test "$CASCADE_FISH_MODE" != "disable_arrow"
        __cascade_export_eval
    end
end
"#,
            self_path = self_path.display()
        )
    }

    fn export(&self, export: &ShellExport) -> String {
        let mut out = String::new();
        for (key, value) in export.iter() {
            match value {
                Some(value) => {
                    out.push_str(&format!("set -gx {key} '{}';\n", fish_escape(value)));
                },
                None => out.push_str(&format!("set -e {key};\n")),
            }
        }
        out
    }

    fn dump(&self, env: &Env) -> String {
        let mut out = String::new();
        for (key, value) in env.iter() {
            out.push_str(&format!("set -gx {key} '{}';\n", fish_escape(value)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_has_prompt_and_pwd_events() {
        let hook = Fish.hook(Path::new("/usr/bin/cascade"));
        assert!(hook.contains("--on-event fish_prompt"));
        assert!(hook.contains("--on-variable PWD"));
        assert!(hook.contains(r#""/usr/bin/cascade" export fish | source"#));
        assert!(hook.contains(r#"test "$CASCADE_FISH_MODE" != "disable_arrow""#));
    }

    #[test]
    fn test_export_set_and_erase() {
        let mut export = ShellExport::new();
        export.set("FOO", "bar");
        export.unset("OLD");
        assert_eq!(Fish.export(&export), "set -gx FOO 'bar';\nset -e OLD;\n");
    }

    #[test]
    fn test_export_escapes_quotes() {
        let mut export = ShellExport::new();
        export.set("QUOTED", "it's");
        assert_eq!(Fish.export(&export), "set -gx QUOTED 'it\\'s';\n");
    }

    #[test]
    fn test_dump_sorted() {
        let env = Env::from_host_env(["B=2", "A=1"]);
        assert_eq!(Fish.dump(&env), "set -gx A '1';\nset -gx B '2';\n");
    }
}
