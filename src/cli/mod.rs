//! Command-line interface for nodekeeper.
//!
//! The binary plays the part of the application embedding the node: it starts
//! and stops the node, runs the update loop next to it and prints lifecycle
//! events. All commands share the global flags defined on [`Cli`].
//!
//! # Commands
//!
//! - `run` - start the node (installing it on first run) and keep it updated
//! - `status` - show paths and local, staged and remote versions
//! - `check` - run one update cycle
//! - `update` - download and install the latest release now
//! - `config` - show, locate or initialize the configuration file
//!
//! # Examples
//!
//! ```bash
//! nodekeeper run
//! nodekeeper --verbose check
//! nodekeeper --config ./node.toml status
//! nodekeeper update --force --no-progress
//! ```

mod check;
pub mod common;
mod config;
mod run;
mod status;
mod update;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Runtime options shared by all commands.
///
/// Built once from the global flags and passed down explicitly instead of
/// being stored in environment variables.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter directive. `None` keeps `RUST_LOG` (or `info`).
    pub log_level: Option<String>,
    /// Hide progress bars and spinners.
    pub no_progress: bool,
    /// Explicit configuration file path.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Default runtime options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Keep an embedded blockchain node installed, running and up to date.
#[derive(Parser)]
#[command(
    name = "nodekeeper",
    about = "Download, run and self-update an embedded blockchain node",
    version,
    author
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the configuration file.
    ///
    /// Defaults to `NODEKEEPER_CONFIG_PATH`, then `~/.nodekeeper/config.toml`.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable progress bars (also `NODEKEEPER_NO_PROGRESS`).
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and keep it updated until Ctrl-C
    Run(run::RunCommand),

    /// Show node paths and versions
    Status(status::StatusCommand),

    /// Run one update check (and install when managing the node)
    Check(check::CheckCommand),

    /// Download and install the latest node release
    Update(update::UpdateCommand),

    /// Manage the configuration file
    Config(config::ConfigCommand),
}

impl Cli {
    /// Execute the parsed command with options built from the global flags.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("warn".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    /// Execute the parsed command with explicit runtime options.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        init_logging(config.log_level.as_deref());

        match self.command {
            Commands::Run(cmd) => cmd.execute(&config).await,
            Commands::Status(cmd) => cmd.execute(&config).await,
            Commands::Check(cmd) => cmd.execute(&config).await,
            Commands::Update(cmd) => cmd.execute(&config).await,
            Commands::Config(cmd) => cmd.execute(config.config_path.clone()).await,
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// An explicit `level` wins over `RUST_LOG`; without either, `info` is used.
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
