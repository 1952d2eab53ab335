//! Manage the nodekeeper configuration file.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::GlobalConfig;

/// Command to manage the configuration file.
///
/// Defaults to `show` when no subcommand is given.
#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: Option<ConfigSubcommands>,
}

#[derive(Subcommand, Debug)]
enum ConfigSubcommands {
    /// Write a configuration file with all defaults and a fresh API key.
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Display the effective configuration (API key masked).
    Show,

    /// Display the path of the configuration file.
    Path,
}

impl ConfigCommand {
    /// Execute the config command against `config_path` (or the default location).
    pub async fn execute(self, config_path: Option<PathBuf>) -> Result<()> {
        let path = GlobalConfig::resolve_path(config_path)?;
        match self.command {
            Some(ConfigSubcommands::Init { force }) => Self::init(&path, force).await,
            Some(ConfigSubcommands::Show) | None => Self::show(&path).await,
            Some(ConfigSubcommands::Path) => {
                println!("{}", path.display());
                Ok(())
            }
        }
    }

    async fn init(path: &std::path::Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            println!("Config already exists at: {}", path.display());
            println!("   Use --force to overwrite");
            return Ok(());
        }

        let mut config = GlobalConfig::default();
        config.ensure_api_key();
        config.save_to(path).await?;

        println!("{} {}", "Created config at:".green(), path.display());
        println!("\n{}", "Next steps:".yellow());
        println!("  1. Adjust [node] dir and ports if needed");
        println!("  2. Run `nodekeeper run` to install and start the node");
        Ok(())
    }

    async fn show(path: &std::path::Path) -> Result<()> {
        let mut config = GlobalConfig::load_with_optional(Some(path.to_path_buf())).await?;
        if let Some(key) = config.node.api_key.as_mut() {
            *key = mask_secret(key);
        }

        println!("{}", "Configuration".bold());
        if path.exists() {
            println!("Location: {}\n", path.display());
        } else {
            println!("Location: {} {}\n", path.display(), "(not created, showing defaults)".dimmed());
        }
        println!("{}", toml::to_string_pretty(&config)?);
        Ok(())
    }
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}****")
}
