//! Download and install the latest node release.

use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use std::time::Duration;

use super::CliConfig;
use super::common::{NodeContext, spawn_event_printer, version_or_unknown};
use crate::node::CycleOutcome;
use crate::utils::progress::ProgressBar;

/// Install the latest node binary now.
#[derive(Args, Debug)]
pub struct UpdateCommand {
    /// Reinstall even if the local binary is already the latest version.
    #[arg(short, long)]
    pub force: bool,
}

impl UpdateCommand {
    /// Execute the update command.
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let ctx = NodeContext::load(cli).await?;
        install_latest(&ctx, cli.no_progress, self.force).await
    }
}

/// Install the latest release into the node directory.
///
/// Skips the download when the active binary already runs the latest version,
/// unless `force` is set. Used by `update` and by `run` on first start.
pub async fn install_latest(ctx: &NodeContext, no_progress: bool, force: bool) -> Result<()> {
    let spinner = ProgressBar::new_spinner(no_progress);
    spinner.set_message("Checking latest node release");
    let release = ctx.locator().latest().await;
    spinner.finish_and_clear();
    let release = release?;

    let local = ctx.probe().local_version(&ctx.paths.active_binary()).await;
    if !force && local.as_ref().is_some_and(|local| *local >= release.version) {
        println!(
            "{}",
            format!("Node is already on the latest version ({})", version_or_unknown(local.as_ref()))
                .green()
        );
        return Ok(());
    }

    println!(
        "Installing node {} ({}) into {}",
        release.version,
        release.asset_name,
        ctx.paths.node_dir().display()
    );

    let orchestrator = ctx.orchestrator();
    let printer = spawn_event_printer(orchestrator.subscribe(), no_progress);
    let outcome = orchestrator.install_release(release).await;
    drop(orchestrator);
    // The printer stops once the last orchestrator clone is gone
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    match outcome {
        CycleOutcome::Installed(version) => {
            println!(
                "{}",
                format!("Node {version} installed at {}", ctx.paths.active_binary().display())
                    .green()
            );
            Ok(())
        }
        CycleOutcome::Failed(reason) => bail!("Node update failed: {reason}"),
        other => bail!("Unexpected update outcome: {other:?}"),
    }
}
