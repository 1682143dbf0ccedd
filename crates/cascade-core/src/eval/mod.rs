//! Script evaluation via a sandboxed bash subprocess.
//!
//! The evaluator runs one script per invocation in a fresh bash process and
//! captures the resulting environment over a side-band pipe on file
//! descriptor 3, so machine data never mixes with user-facing output:
//!
//! 1. The parent opens a pipe and arranges for the write end to become fd 3
//!    in the child.
//! 2. The child runs `eval "$CASCADE_STDLIB" && __main__ '<script path>'`.
//! 3. The stdlib's `__main__` installs an EXIT trap, sources the script, and
//!    the trap runs `"$CASCADE_BIN" dump json >&3` on the way out.
//! 4. The parent closes its write end, reads fd 3 to EOF, then reaps the
//!    child. Stdout is captured for error reporting; stderr passes through
//!    so the user sees their own `echo`s.

pub mod cache;

use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

pub use cache::{Cache, CacheError};

use crate::env::Env;
use crate::envrc::Envrc;

/// Variable through which scripts declare extra files to watch; consumed by
/// the evaluator and never returned in the captured environment.
const EXTRA_WATCHES_KEY: &str = "CASCADE_EXTRA_WATCHES";

/// Errors from script evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The script file does not exist.
    #[error("rc file does not exist: {}", path.display())]
    NotFound {
        /// The missing script.
        path: PathBuf,
    },

    /// No bash binary was found on `PATH`.
    #[error("find bash: no executable `bash` on PATH")]
    BashNotFound,

    /// The evaluator needs the embedded stdlib.
    #[error("stdlib content is required")]
    StdlibRequired,

    /// The evaluator needs the path of the cascade binary for callbacks.
    #[error("self path is required")]
    SelfPathRequired,

    /// Creating the side-band pipe failed.
    #[error("create pipe: {0}")]
    Pipe(#[source] nix::Error),

    /// Spawning bash failed.
    #[error("start bash: {0}")]
    Spawn(#[source] io::Error),

    /// Reading the side-band channel failed; the child has been killed.
    #[error("read side-band output: {0}")]
    ReadSideband(#[source] io::Error),

    /// Waiting for the child failed.
    #[error("wait for bash: {0}")]
    Wait(#[source] io::Error),

    /// The script exited non-zero. The message carries the subprocess's
    /// captured stdout for context.
    #[error("bash exited with status {status}: {stdout}")]
    ScriptFailed {
        /// Exit status of the subprocess.
        status: i32,
        /// Captured stdout, or `(no output)`.
        stdout: String,
    },

    /// The script exited cleanly but wrote nothing to fd 3.
    #[error("no environment output from {}", path.display())]
    EmptyOutput {
        /// The script that produced nothing.
        path: PathBuf,
    },

    /// The fd-3 payload was not a JSON object of strings.
    #[error("parse env output: {0}")]
    ParseJson(#[source] serde_json::Error),
}

/// The output of one script evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResult {
    /// The environment after the script ran.
    pub env: Env,

    /// Additional files the script asked to watch via `watch_file`.
    pub extra_watches: Vec<PathBuf>,
}

/// Executes scripts and captures their environment changes.
#[derive(Debug)]
pub struct Evaluator {
    bash_path: PathBuf,
    stdlib: String,
    self_path: PathBuf,
    cache: Option<Cache>,
}

impl Evaluator {
    /// Create an evaluator.
    ///
    /// `bash_path` of `None` searches `PATH`. `stdlib` is the embedded
    /// function library evaluated before every script. `self_path` is the
    /// cascade binary the subprocess re-invokes for `dump json`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::BashNotFound`] when bash cannot be located, and
    /// [`EvalError::StdlibRequired`] / [`EvalError::SelfPathRequired`] for
    /// missing inputs.
    pub fn new(
        bash_path: Option<&Path>,
        stdlib: impl Into<String>,
        self_path: impl Into<PathBuf>,
    ) -> Result<Self, EvalError> {
        let bash_path = match bash_path {
            Some(path) => path.to_path_buf(),
            None => find_bash().ok_or(EvalError::BashNotFound)?,
        };

        let stdlib = stdlib.into();
        if stdlib.is_empty() {
            return Err(EvalError::StdlibRequired);
        }

        let self_path = self_path.into();
        if self_path.as_os_str().is_empty() {
            return Err(EvalError::SelfPathRequired);
        }

        Ok(Self {
            bash_path,
            stdlib,
            self_path,
            cache: None,
        })
    }

    /// Enable result caching.
    #[must_use]
    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Evaluate a script with the given input environment.
    ///
    /// Consults the cache first when enabled; stores the result afterwards
    /// (best effort, a failed store is not an error).
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] if the script does not exist, the subprocess
    /// cannot be run, it exits non-zero, or its output cannot be parsed.
    pub fn evaluate(&self, rc: &Envrc, input_env: &Env) -> Result<EvalResult, EvalError> {
        if !rc.exists {
            return Err(EvalError::NotFound {
                path: rc.path.clone(),
            });
        }

        let cache_key = self
            .cache
            .as_ref()
            .map(|_| cache::cache_key(rc, input_env));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(cached) = cache.get(key) {
                return Ok(cached);
            }
        }

        let result = self.run_subprocess(rc, input_env)?;

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Err(e) = cache.set(key, &result, &rc.path) {
                debug!(error = %e, "cache store failed");
            }
        }

        Ok(result)
    }

    fn run_subprocess(&self, rc: &Envrc, input_env: &Env) -> Result<EvalResult, EvalError> {
        // O_CLOEXEC on both ends: the child sees only the dup2'd fd 3 (dup2
        // does not carry the flag), so no stray descriptors survive exec.
        let (sideband_read, sideband_write) =
            nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).map_err(EvalError::Pipe)?;

        let script = format!(
            r#"eval "$CASCADE_STDLIB" && __main__ {}"#,
            quote_single(&rc.path.to_string_lossy())
        );

        let mut cmd = Command::new(&self.bash_path);
        cmd.arg("-c")
            .arg(script)
            .env_clear()
            .envs(input_env.iter())
            .env("CASCADE_BIN", &self.self_path)
            .env("CASCADE_DIR", &rc.dir)
            .env("CASCADE_STDLIB", &self.stdlib)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // Install the pipe's write end as fd 3 in the child.
        let write_fd = sideband_write.as_raw_fd();
        // Async-signal-safe: only dup2 runs between fork and exec.
        let redirect = move || {
            if unsafe { nix::libc::dup2(write_fd, 3) } == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        };
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(redirect);
        }

        let mut child = cmd.spawn().map_err(EvalError::Spawn)?;

        // Close the parent's write end so the read below sees EOF once the
        // child (and any of its own children holding fd 3) exits.
        drop(sideband_write);

        let mut payload = Vec::new();
        let read_result =
            std::fs::File::from(sideband_read).read_to_end(&mut payload);
        if let Err(e) = read_result {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EvalError::ReadSideband(e));
        }

        let output = child.wait_with_output().map_err(EvalError::Wait)?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stdout = stdout.trim();
            return Err(EvalError::ScriptFailed {
                status: output.status.code().unwrap_or(-1),
                stdout: if stdout.is_empty() {
                    "(no output)".to_string()
                } else {
                    stdout.to_string()
                },
            });
        }

        if payload.is_empty() {
            return Err(EvalError::EmptyOutput {
                path: rc.path.clone(),
            });
        }

        let mut env: Env = serde_json::from_slice(&payload).map_err(EvalError::ParseJson)?;

        // Extra watch declarations ride in the captured env; peel them off.
        let extra_watches = env
            .remove(EXTRA_WATCHES_KEY)
            .map(|watches| {
                watches
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(EvalResult { env, extra_watches })
    }
}

/// Locate `bash` on `PATH`.
fn find_bash() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join("bash");
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Single-quote a string for bash: the only metacharacter inside single
/// quotes is the quote itself.
fn quote_single(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envrc::ENVRC_NAME;

    /// A minimal stdlib mirroring the real `__main__` / `__dump_at_exit`
    /// pair, enough to drive the fd-3 protocol in tests.
    const TEST_STDLIB: &str = r#"
__main__() {
    local rc_file="$1"
    trap __dump_at_exit EXIT
    cd "$CASCADE_DIR"
    source "$rc_file"
}

__dump_at_exit() {
    local ret=$?
    trap - EXIT
    "$CASCADE_BIN" dump json >&3
    exit "$ret"
}
"#;

    /// A stand-in for the cascade binary: dumps the environment as JSON
    /// when called with `dump json`, like the real thing.
    const MOCK_DUMP_BIN: &str = r#"#!/bin/bash
if [[ "$1" == "dump" && "$2" == "json" ]]; then
    echo -n "{"
    first=true
    while IFS='=' read -r -d '' key value; do
        [[ -z "$key" ]] && continue
        if [[ "$first" == "true" ]]; then first=false; else echo -n ","; fi
        value="${value//\\/\\\\}"
        value="${value//\"/\\\"}"
        value="${value//$'\n'/\\n}"
        value="${value//$'\t'/\\t}"
        value="${value//$'\r'/\\r}"
        echo -n "\"$key\":\"$value\""
    done < <(env -0)
    echo "}"
    exit 0
fi
exit 1
"#;

    fn write_mock_bin(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let bin = dir.join("cascade-mock");
        std::fs::write(&bin, MOCK_DUMP_BIN).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        bin
    }

    fn write_rc(dir: &Path, content: &str) -> Envrc {
        let path = dir.join(ENVRC_NAME);
        std::fs::write(&path, content).unwrap();
        Envrc::new(&path).unwrap()
    }

    fn evaluator(dir: &Path) -> Evaluator {
        Evaluator::new(None, TEST_STDLIB, write_mock_bin(dir)).unwrap()
    }

    fn base_env() -> Env {
        Env::from_host_env([
            format!("PATH={}", std::env::var("PATH").unwrap_or_default()),
            "HOME=/home/test".to_string(),
        ])
    }

    #[test]
    fn test_new_requires_stdlib_and_self_path() {
        assert!(matches!(
            Evaluator::new(None, "", "/usr/bin/cascade"),
            Err(EvalError::StdlibRequired)
        ));
        assert!(matches!(
            Evaluator::new(None, "stdlib", ""),
            Err(EvalError::SelfPathRequired)
        ));
    }

    #[test]
    fn test_evaluate_rejects_missing_rc() {
        let dir = tempfile::tempdir().unwrap();
        let rc = Envrc::new(dir.path().join(ENVRC_NAME)).unwrap();
        let eval = evaluator(dir.path());
        assert!(matches!(
            eval.evaluate(&rc, &base_env()),
            Err(EvalError::NotFound { .. })
        ));
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[test]
    fn test_evaluate_simple_export() {
        let dir = tempfile::tempdir().unwrap();
        let rc = write_rc(dir.path(), r#"export FOO="bar""#);
        let eval = evaluator(dir.path());

        let result = eval.evaluate(&rc, &base_env()).unwrap();
        assert_eq!(result.env.get("FOO"), Some("bar"));
        // Input env flows through.
        assert_eq!(result.env.get("HOME"), Some("/home/test"));
        assert!(result.extra_watches.is_empty());
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_evaluate_threads_input_env() {
        let dir = tempfile::tempdir().unwrap();
        let rc = write_rc(dir.path(), r#"export OUT="${IN}-processed""#);
        let eval = evaluator(dir.path());

        let mut env = base_env();
        env.insert("IN", "value");
        let result = eval.evaluate(&rc, &env).unwrap();
        assert_eq!(result.env.get("OUT"), Some("value-processed"));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_evaluate_failing_script_surfaces_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let rc = write_rc(dir.path(), "echo diagnostic-context\nexit 7\n");
        let eval = evaluator(dir.path());

        // The EXIT trap still dumps the env, but the non-zero status wins.
        match eval.evaluate(&rc, &base_env()) {
            Err(EvalError::ScriptFailed { status, stdout }) => {
                assert_eq!(status, 7);
                assert!(stdout.contains("diagnostic-context"));
            },
            other => panic!("expected ScriptFailed, got {other:?}"),
        }
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_evaluate_extracts_extra_watches() {
        let dir = tempfile::tempdir().unwrap();
        let rc = write_rc(
            dir.path(),
            "export CASCADE_EXTRA_WATCHES=$'/etc/hosts\\n/etc/resolv.conf'\nexport SOME=var\n",
        );
        let eval = evaluator(dir.path());

        let result = eval.evaluate(&rc, &base_env()).unwrap();
        assert_eq!(
            result.extra_watches,
            vec![PathBuf::from("/etc/hosts"), PathBuf::from("/etc/resolv.conf")]
        );
        assert!(!result.env.contains_key("CASCADE_EXTRA_WATCHES"));
        assert_eq!(result.env.get("SOME"), Some("var"));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn test_evaluate_empty_sideband_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let rc = write_rc(dir.path(), "export OK=1");
        // A stdlib that never dumps: clean exit, empty fd 3.
        let eval = Evaluator::new(
            None,
            "__main__() { source \"$1\"; }",
            write_mock_bin(dir.path()),
        )
        .unwrap();

        assert!(matches!(
            eval.evaluate(&rc, &base_env()),
            Err(EvalError::EmptyOutput { .. })
        ));
    }

    #[test]
    fn test_quote_single() {
        assert_eq!(quote_single("plain"), "'plain'");
        assert_eq!(quote_single("with space"), "'with space'");
        assert_eq!(quote_single("it's"), r#"'it'\''s'"#);
    }
}
