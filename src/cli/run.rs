//! Run the node in the foreground and keep it updated.

use anyhow::{Context, Result, anyhow};
use clap::Args;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use super::CliConfig;
use super::common::{NodeContext, print_event};
use super::update::install_latest;
use crate::node::{
    LogLine, LogStream, NodeLaunchConfig, NodeProcessHandle, ProcessSupervisor, UpdateEvent,
};
use crate::utils::progress::ProgressBar;

/// Start the node and supervise it until Ctrl-C.
///
/// On first run the node binary is installed and an API key is generated. The
/// update loop runs next to the node; when it installs a new version the node
/// is restarted on it.
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Do not run the background update loop.
    #[arg(long)]
    pub no_update: bool,

    /// Keep the running node after an update was installed.
    #[arg(long)]
    pub no_restart: bool,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let mut ctx = NodeContext::load(cli).await?;

        if ctx.config.ensure_api_key() {
            ctx.save_config().await.context("Failed to save generated API key")?;
            info!("Generated node API key in {}", ctx.config_path.display());
        }

        if ctx.config.node.internal && !ctx.paths.active_binary().exists() {
            println!("{}", "Node binary not found, installing the latest release".yellow());
            install_latest(&ctx, cli.no_progress, true).await?;
        }

        let launch = ctx.config.launch_config()?;
        let supervisor = ctx.supervisor();
        let mut handle = start_node(&supervisor, &launch).await?;

        let orchestrator = ctx.orchestrator();
        let mut events = orchestrator.subscribe();
        let updates = (!self.no_update).then(|| orchestrator.spawn());
        let bar = ProgressBar::new_download(cli.no_progress);

        let result = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("{}", "Stopping node...".cyan());
                    let message = supervisor.stop(&handle).await?;
                    println!("{}", message.green());
                    break Ok(());
                }
                code = handle.wait_exit() => {
                    break Err(anyhow!(
                        "node process {} exited unexpectedly with code {code}",
                        handle.pid()
                    ));
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        print_event(&event, &bar);
                        if matches!(event, UpdateEvent::UpdateDownloaded { .. }) && !self.no_restart {
                            println!("{}", "Restarting node on the new version...".cyan());
                            let message = supervisor.stop(&handle).await?;
                            debug!("{message}");
                            handle = start_node(&supervisor, &launch).await?;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => debug!("Skipped {skipped} update event(s)"),
                    Err(RecvError::Closed) => {}
                },
            }
        };

        if let Some(updates) = updates {
            updates.cancel();
        }
        result
    }
}

async fn start_node(
    supervisor: &ProcessSupervisor,
    launch: &NodeLaunchConfig,
) -> Result<NodeProcessHandle> {
    let handle = supervisor
        .start(launch, print_log_line)
        .await
        .context("Failed to start node")?;
    println!(
        "{} node running (pid {}), logs in {}",
        "started:".green().bold(),
        handle.pid(),
        launch.paths.logs_dir().display()
    );
    Ok(handle)
}

fn print_log_line(line: LogLine) {
    match line.stream {
        LogStream::Stdout => println!("{}", line.line),
        LogStream::Stderr => eprintln!("{}", line.line.dimmed()),
    }
}
