//! End-to-end tests for the export pipeline, driving the compiled binary
//! against throwaway XDG roots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use cascade_core::env::EnvDiff;

/// A hermetic fixture: fake home, private XDG stores, and a cascade root.
struct Fixture {
    _tmp: tempfile::TempDir,
    home: PathBuf,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(tmp.path()).unwrap();
        let home = base.join("home");
        let root = base.join("root");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::create_dir_all(&root).unwrap();
        Self {
            _tmp: tmp,
            home,
            root,
        }
    }

    fn write_envrc(&self, rel_dir: &str, content: &str) -> PathBuf {
        let dir = if rel_dir.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel_dir)
        };
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".envrc");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cascade(&self, cwd: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cascade"));
        cmd.current_dir(cwd)
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .env("HOME", &self.home)
            .env("XDG_DATA_HOME", self.home.join(".local/share"))
            .env("XDG_CACHE_HOME", self.home.join(".cache"))
            .env("XDG_CONFIG_HOME", self.home.join(".config"))
            .env("CASCADE_CASCADE_ROOT", &self.root);
        cmd
    }

    fn allow(&self, path: &Path) {
        let out = self
            .cascade(&self.root)
            .arg("allow")
            .arg(path)
            .output()
            .unwrap();
        assert!(out.status.success(), "allow failed: {}", stderr(&out));
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_two_level_inheritance_with_override() {
    let fx = Fixture::new();
    fx.write_envrc("", "export HOME_VAR=from_home\n");
    let work_rc = fx.write_envrc(
        "work",
        "export WORK_VAR=from_work\nexport HOME_VAR=overridden\n",
    );
    fx.allow(&fx.root.join(".envrc"));
    fx.allow(&work_rc);

    let out = fx
        .cascade(&fx.root.join("work"))
        .args(["export", "bash"])
        .output()
        .unwrap();
    assert!(out.status.success(), "export failed: {}", stderr(&out));

    let transcript = stdout(&out);
    assert!(transcript.contains("export HOME_VAR=\"overridden\";"));
    assert!(transcript.contains("export WORK_VAR=\"from_work\";"));
    assert!(transcript.contains(&format!(
        "export CASCADE_DIR=\"{}\";",
        fx.root.join("work").display()
    )));
    assert!(transcript.contains("export CASCADE_DIFF=\""));
    assert!(transcript.contains("export CASCADE_WATCHES=\""));
}

#[test]
fn test_content_change_invalidates_allow() {
    let fx = Fixture::new();
    let rc = fx.write_envrc("", "export X=a\n");
    fx.allow(&rc);

    // Modified bytes mean a new content hash; the old allow is void.
    std::fs::write(&rc, "export X=b\n").unwrap();

    let out = fx
        .cascade(&fx.root)
        .args(["export", "bash"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(!stdout(&out).contains("export X="));
    assert!(stderr(&out).contains("not allowed"));
}

#[test]
fn test_deny_overrides_trust_and_reverts() {
    let fx = Fixture::new();
    let rc = fx.write_envrc("t", "export T_VAR=1\n");

    let trust = fx
        .cascade(&fx.root)
        .arg("trust")
        .arg(fx.root.join("t"))
        .output()
        .unwrap();
    assert!(trust.status.success(), "trust failed: {}", stderr(&trust));

    let deny = fx
        .cascade(&fx.root)
        .arg("deny")
        .arg(&rc)
        .output()
        .unwrap();
    assert!(deny.status.success(), "deny failed: {}", stderr(&deny));

    // Simulate a session that still carries the previously applied diff.
    let prior = EnvDiff {
        prev: BTreeMap::from([("T_VAR".to_string(), String::new())]),
        next: BTreeMap::from([("T_VAR".to_string(), "1".to_string())]),
    };

    let out = fx
        .cascade(&fx.root.join("t"))
        .args(["export", "bash"])
        .env("CASCADE_DIFF", prior.marshal().unwrap())
        .env("T_VAR", "1")
        .output()
        .unwrap();
    assert!(out.status.success());

    assert!(stderr(&out).contains("blocked"));
    let transcript = stdout(&out);
    assert!(transcript.contains("unset T_VAR;"));
    assert!(transcript.contains("unset CASCADE_DIR;"));
    assert!(transcript.contains("unset CASCADE_DIFF;"));
}

#[test]
fn test_reversible_leave() {
    let fx = Fixture::new();
    let empty = fx.root.join("plain");
    std::fs::create_dir_all(&empty).unwrap();

    let prior = EnvDiff {
        prev: BTreeMap::from([("X".to_string(), String::new())]),
        next: BTreeMap::from([("X".to_string(), "new".to_string())]),
    };

    let out = fx
        .cascade(&empty)
        .args(["export", "bash"])
        .env("CASCADE_DIFF", prior.marshal().unwrap())
        .env("X", "new")
        .output()
        .unwrap();
    assert!(out.status.success(), "export failed: {}", stderr(&out));

    let transcript = stdout(&out);
    assert!(transcript.contains("unset X;"));
    assert!(transcript.contains("unset CASCADE_DIFF;"));
    assert!(transcript.contains("unset CASCADE_DIR;"));
    assert!(transcript.contains("unset CASCADE_FILE;"));
    assert!(transcript.contains("unset CASCADE_WATCHES;"));
}

#[test]
fn test_no_envrc_and_no_prior_diff_emits_nothing() {
    let fx = Fixture::new();
    let empty = fx.root.join("plain");
    std::fs::create_dir_all(&empty).unwrap();

    let out = fx
        .cascade(&empty)
        .args(["export", "bash"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(stdout(&out), "");
}

#[test]
fn test_repeated_runs_are_stable() {
    let fx = Fixture::new();
    let rc = fx.write_envrc("", "export STABLE=value\n");
    fx.allow(&rc);

    let first = fx
        .cascade(&fx.root)
        .args(["export", "bash"])
        .output()
        .unwrap();
    assert!(first.status.success(), "first run: {}", stderr(&first));
    let first_out = stdout(&first);
    assert!(first_out.contains("export STABLE=\"value\";"));

    // A second prompt in the same directory: same transcript, but the
    // change summary is suppressed because the effect did not change.
    let diff_line = "cascade export:";
    assert!(stderr(&first).contains(diff_line));

    let mut diff_value = String::new();
    for line in first_out.lines() {
        if let Some(rest) = line.strip_prefix("export CASCADE_DIFF=\"") {
            diff_value = rest.trim_end_matches("\";").to_string();
        }
    }
    assert!(!diff_value.is_empty());

    let second = fx
        .cascade(&fx.root)
        .args(["export", "bash"])
        .env("CASCADE_DIFF", &diff_value)
        .env("CASCADE_DIR", &fx.root)
        .env("STABLE", "value")
        .output()
        .unwrap();
    assert!(second.status.success(), "second run: {}", stderr(&second));
    assert!(stdout(&second).contains("export STABLE=\"value\";"));
    assert!(
        !stderr(&second).contains(diff_line),
        "expected suppressed log, got: {}",
        stderr(&second)
    );
}

#[test]
fn test_check_exit_codes() {
    let fx = Fixture::new();
    let rc = fx.write_envrc("", "export OK=1\n");

    let before = fx
        .cascade(&fx.root)
        .args(["check", "--silent"])
        .arg(&rc)
        .output()
        .unwrap();
    assert!(!before.status.success());

    fx.allow(&rc);

    let after = fx
        .cascade(&fx.root)
        .args(["check", "--silent"])
        .arg(&rc)
        .output()
        .unwrap();
    assert!(after.status.success());
}

#[test]
fn test_hook_output() {
    let fx = Fixture::new();

    let out = fx.cascade(&fx.root).args(["hook", "bash"]).output().unwrap();
    assert!(out.status.success());
    assert!(stdout(&out).contains("_cascade_hook"));
    assert!(stdout(&out).contains("PROMPT_COMMAND"));

    let bad = fx
        .cascade(&fx.root)
        .args(["hook", "tcsh"])
        .output()
        .unwrap();
    assert!(!bad.status.success());
}
