//! Show where the node lives and which versions are around.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::CliConfig;
use super::common::{NodeContext, version_or_unknown};

/// Display node paths and the local, staged and latest versions.
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Do not query the release API.
    #[arg(long)]
    pub offline: bool,
}

impl StatusCommand {
    /// Execute the status command.
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let ctx = NodeContext::load(cli).await?;
        let probe = ctx.probe();
        let paths = &ctx.paths;

        let active = probe.local_version(&paths.active_binary()).await;
        let staged = probe.local_version(&paths.staged_binary()).await;

        println!("{}", "Node".bold());
        println!("  config:     {}", ctx.config_path.display());
        println!("  directory:  {}", paths.node_dir().display());
        println!(
            "  managed:    {}",
            if ctx.config.node.internal { "internal" } else { "external" }
        );
        println!("  binary:     {}", paths.active_binary().display());
        println!("  logs:       {}", paths.logs_dir().display());

        println!("\n{}", "Versions".bold());
        println!("  active:     {}", version_or_unknown(active.as_ref()));
        if paths.staged_binary().exists() {
            println!("  staged:     {}", version_or_unknown(staged.as_ref()));
        }

        if self.offline {
            return Ok(());
        }

        let remote = probe.remote_version().await;
        println!("  latest:     {}", version_or_unknown(remote.as_ref()));

        match (active, remote) {
            (Some(active), Some(remote)) if remote > active => {
                println!("\n{}", format!("Update available: {active} -> {remote}").yellow());
                println!("Run `nodekeeper update` to install it");
            }
            (None, Some(_)) if !paths.active_binary().exists() => {
                println!("\n{}", "Node is not installed".yellow());
                println!("Run `nodekeeper update` to install it");
            }
            _ => {}
        }
        Ok(())
    }
}
