//! # cascade-core
//!
//! Core library for cascade - a shell-integrated environment manager with
//! hierarchical inheritance across directories.
//!
//! Each time the user's shell is about to render a prompt, cascade computes
//! the environment the shell should be in from the chain of `.envrc` scripts
//! between a configured root directory and the current working directory.
//! Parents set defaults, children refine them.
//!
//! ## Subsystems
//!
//! - **Chain discovery** ([`envrc`]): deterministic root-to-leaf enumeration
//!   of per-directory scripts with symlink-safe resolution.
//! - **Authorization** ([`auth`]): per-content allow, per-path deny,
//!   per-subtree trust, and a configured whitelist, with defined precedence.
//! - **Evaluation** ([`eval`]): a sandboxed bash subprocess protocol using a
//!   side-band file descriptor, plus a content-addressed cache.
//! - **Env / diff pipeline** ([`env`]): minimal reversible transforms between
//!   a baseline and a new environment, carried in session variables.
//! - **Persistent state** ([`state`]): durable record of the last-applied
//!   diff per script, so denial or removal can still revert.
//! - **Shell formatting** ([`shell`]): render environment changes as
//!   bash/zsh/fish syntax, plus the per-shell prompt hooks.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cascade_core::auth::Store;
//! use cascade_core::envrc;
//!
//! let chain = envrc::find_chain("/home/user", "/home/user/work/api")?;
//! let store = Store::new()?;
//! for rc in envrc::existing_only(&chain) {
//!     println!("{}: {}", rc.path.display(), store.check(&rc));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod env;
pub mod envrc;
pub mod eval;
pub mod shell;
pub mod state;

/// Re-export commonly used types at the crate root.
pub use auth::{AllowStatus, Store};
pub use config::Config;
pub use env::{Env, EnvDiff};
pub use envrc::Envrc;
pub use eval::{EvalResult, Evaluator};
