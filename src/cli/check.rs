//! Run a single update cycle.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::time::Duration;

use super::CliConfig;
use super::common::{NodeContext, describe_outcome, spawn_event_printer};
use crate::node::CycleOutcome;

/// Check for a newer node release once.
///
/// When the configuration says the node is managed internally, a newer release
/// is downloaded and installed as part of the check, exactly as the background
/// loop of `run` would do.
#[derive(Args, Debug)]
pub struct CheckCommand {}

impl CheckCommand {
    /// Execute the check command.
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let ctx = NodeContext::load(cli).await?;
        println!("{}", "Checking for node updates...".cyan());

        let orchestrator = ctx.orchestrator();
        let printer = spawn_event_printer(orchestrator.subscribe(), cli.no_progress);
        let outcome = orchestrator.check_now().await;
        drop(orchestrator);
        let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

        let summary = describe_outcome(&outcome);
        match outcome {
            CycleOutcome::Failed(_) => anyhow::bail!("{summary}"),
            CycleOutcome::RemoteUnavailable | CycleOutcome::Skipped => {
                println!("{}", summary.yellow());
            }
            _ => println!("{}", summary.green()),
        }
        Ok(())
    }
}
