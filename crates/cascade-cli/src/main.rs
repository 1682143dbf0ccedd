//! cascade - hierarchical environment variable management.
//!
//! A direnv-like tool that composes the whole chain of `.envrc` files from
//! a configured root down to the current directory: parents set defaults,
//! children refine them.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

/// The embedded bash standard library sourced into every evaluation.
const STDLIB: &str = include_str!("stdlib.sh");

/// cascade - hierarchical environment variable management
#[derive(Parser, Debug)]
#[command(name = "cascade")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the shell hook for cascade integration
    Hook {
        /// Shell name (bash, zsh, fish)
        shell: String,
    },

    /// Evaluate the .envrc chain and print shell commands
    Export {
        /// Shell name (bash, zsh, fish)
        shell: String,

        /// Disable evaluation caching
        #[arg(long)]
        no_cache: bool,
    },

    /// Allow an .envrc file to be loaded
    Allow {
        /// Path to the .envrc (defaults to ./.envrc)
        path: Option<PathBuf>,

        /// Trust all .envrc files under this directory
        #[arg(short, long)]
        recursive: bool,
    },

    /// Deny an .envrc file from being loaded
    Deny {
        /// Path to the .envrc (defaults to ./.envrc)
        path: Option<PathBuf>,
    },

    /// Trust all .envrc files under a directory
    Trust {
        /// Directory to trust
        path: Option<PathBuf>,

        /// List all trusted subtrees
        #[arg(short, long)]
        list: bool,

        /// Remove trust for a subtree
        #[arg(short = 'd', long)]
        remove: bool,
    },

    /// Show cascade status for the current directory
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check if an .envrc file is allowed (exit 0 if allowed)
    Check {
        /// Path to the .envrc file
        file: PathBuf,

        /// Suppress output (exit code only)
        #[arg(short, long)]
        silent: bool,
    },

    /// Show the cascade of .envrc files
    Tree {
        /// Limit output to these variables
        vars: Vec<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Show variable values
        #[arg(short = 'v', long)]
        values: bool,
    },

    /// Show which .envrc file set a variable
    Which {
        /// Variable name
        var: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Dump the environment in the given format (internal)
    #[command(hide = true)]
    Dump {
        /// Output format (only `json`)
        format: String,
    },

    /// Show current configuration
    Config {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check the cascade installation for common issues
    Doctor,

    /// Migrate from direnv to cascade
    Migrate {
        /// Show what would be migrated without making changes
        #[arg(long)]
        dry_run: bool,

        /// Only check for compatibility issues
        #[arg(long)]
        check_only: bool,
    },

    /// Print the cascade version
    Version,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = cascade_core::Config::load()?;

    match cli.command {
        Commands::Hook { shell } => commands::hook::run(&shell),
        Commands::Export { shell, no_cache } => {
            commands::export::run(&shell, &config, STDLIB, no_cache)
        },
        Commands::Allow { path, recursive } => commands::allow::run(path.as_deref(), recursive),
        Commands::Deny { path } => commands::deny::run(path.as_deref()),
        Commands::Trust { path, list, remove } => {
            commands::trust::run(path.as_deref(), list, remove)
        },
        Commands::Status { json } => commands::status::run(&config, json),
        Commands::Check { file, silent } => commands::check::run(&file, &config, silent),
        Commands::Tree { vars, json, values } => {
            commands::tree::run(&vars, &config, STDLIB, json, values)
        },
        Commands::Which { var, json } => commands::which::run(&var, &config, STDLIB, json),
        Commands::Dump { format } => commands::dump::run(&format),
        Commands::Config { json } => commands::config::run(&config, json),
        Commands::Doctor => commands::doctor::run(&config),
        Commands::Migrate {
            dry_run,
            check_only,
        } => commands::migrate::run(dry_run, check_only),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        },
    }
}
