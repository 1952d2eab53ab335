//! Common utilities for CLI commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::CliConfig;
use crate::config::GlobalConfig;
use crate::node::{
    CycleOutcome, Downloader, NodePaths, ProcessSupervisor, ReleaseLocator, UpdateEvent,
    UpdateOrchestrator, VersionProbe, http_client,
};
use crate::utils::progress::ProgressBar;

/// Everything a command needs to work on the configured node.
#[derive(Debug)]
pub struct NodeContext {
    /// Loaded configuration
    pub config: GlobalConfig,
    /// File the configuration was loaded from (may not exist)
    pub config_path: PathBuf,
    /// Node filesystem layout
    pub paths: NodePaths,
    client: reqwest::Client,
}

impl NodeContext {
    /// Load the configuration selected by `cli` and resolve the node layout.
    pub async fn load(cli: &CliConfig) -> Result<Self> {
        let config_path = GlobalConfig::resolve_path(cli.config_path.clone())?;
        let config = GlobalConfig::load_with_optional(Some(config_path.clone())).await?;
        let paths = config.node_paths().context("Failed to resolve node directory")?;
        let client = http_client()?;

        Ok(Self {
            config,
            config_path,
            paths,
            client,
        })
    }

    /// Release locator for the configured release API.
    pub fn locator(&self) -> ReleaseLocator {
        self.config.release_locator(self.client.clone())
    }

    /// Version probe backed by [`locator`](Self::locator).
    pub fn probe(&self) -> VersionProbe {
        VersionProbe::new(self.locator())
    }

    /// Process supervisor.
    pub fn supervisor(&self) -> ProcessSupervisor {
        ProcessSupervisor::new()
    }

    /// Update orchestrator for the configured node.
    pub fn orchestrator(&self) -> UpdateOrchestrator {
        UpdateOrchestrator::builder(
            self.paths.clone(),
            self.probe(),
            Downloader::new(self.client.clone()),
        )
        .manages_internal_node(self.config.node.internal)
        .interval(self.config.check_interval())
        .build()
    }

    /// Save the configuration back to where it was loaded from.
    pub async fn save_config(&self) -> Result<()> {
        self.config.save_to(&self.config_path).await
    }
}

/// Print one update event. Download progress goes to `bar`.
pub fn print_event(event: &UpdateEvent, bar: &ProgressBar) {
    match event {
        UpdateEvent::UpdateAvailable { version } => {
            println!("{} node {version} is available", "update:".yellow().bold());
            bar.set_message(format!("Downloading {version}"));
        }
        UpdateEvent::DownloadProgress(progress) => bar.update(progress),
        UpdateEvent::UpdateDownloaded { version } => {
            bar.finish_and_clear();
            println!("{} node {version} installed", "update:".green().bold());
        }
        UpdateEvent::UpdateFailed { version, reason } => {
            bar.finish_and_clear();
            println!("{} installing node {version} failed: {reason}", "update:".red().bold());
        }
    }
}

/// Print every event from `events` until the channel closes.
pub fn spawn_event_printer(
    mut events: broadcast::Receiver<UpdateEvent>,
    no_progress: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new_download(no_progress);
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event, &bar),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {skipped} update event(s)");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        bar.finish_and_clear();
    })
}

/// Human-readable summary of a cycle outcome.
pub fn describe_outcome(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Skipped => "node binary not installed yet, run `nodekeeper update`".to_string(),
        CycleOutcome::RemoteUnavailable => "could not reach the release API".to_string(),
        CycleOutcome::UpToDate => "node is up to date".to_string(),
        CycleOutcome::UpdateAvailable(v) => format!("node {v} is available"),
        CycleOutcome::Downloading(v) => format!("node {v} is being downloaded"),
        CycleOutcome::Installed(v) => format!("node {v} installed, restart the node to use it"),
        CycleOutcome::Failed(reason) => format!("update failed: {reason}"),
    }
}

/// Display helper for optional versions.
pub fn version_or_unknown(version: Option<&semver::Version>) -> String {
    version.map_or_else(|| "unavailable".dimmed().to_string(), ToString::to_string)
}
