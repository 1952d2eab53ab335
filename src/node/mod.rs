//! Management of the embedded node binary
//!
//! This module locates, downloads, version-probes, launches, stops and
//! self-updates the external node binary. Components, leaves first:
//!
//! - [`release`] - [`ReleaseLocator`] resolves the latest release and its
//!   platform asset from the release API
//! - [`version_probe`] - [`VersionProbe`] runs `<binary> --version` and asks
//!   the locator for the remote version
//! - [`download`] - [`Downloader`] streams a binary to the staging path with
//!   throttled progress
//! - [`swap`] - [`AtomicSwap`] replaces the active binary with the staged one
//! - [`supervisor`] - [`ProcessSupervisor`] spawns, observes and stops the node
//! - [`orchestrator`] - [`UpdateOrchestrator`] ties everything together in a
//!   periodic update loop
//!
//! [`NodePaths`] describes the filesystem layout they all share.
//!
//! # Control flow
//!
//! Callers start and stop the node through [`ProcessSupervisor`] directly. The
//! [`UpdateOrchestrator`] runs independently and publishes [`UpdateEvent`]s;
//! it never restarts the node. Restarting after an update is up to the caller.

pub mod download;
pub mod orchestrator;
pub mod paths;
pub mod release;
pub mod supervisor;
pub mod swap;
pub mod version_probe;

pub use download::{DownloadProgress, Downloader, NoProgress, ProgressSink};
pub use orchestrator::{
    CycleOutcome, UpdateEvent, UpdateLoopHandle, UpdateOrchestrator, UpdateOrchestratorBuilder,
    UpdateStage,
};
pub use paths::NodePaths;
pub use release::{ReleaseInfo, ReleaseLocator};
pub use supervisor::{
    LogLine, LogSink, LogStream, NodeLaunchConfig, NodeProcessHandle, ProcessSupervisor,
};
pub use swap::{AtomicSwap, FileRemover, TokioRemover};
pub use version_probe::VersionProbe;

use crate::constants::CONNECT_TIMEOUT;
use crate::core::NodeError;

/// Build the HTTP client shared by the release lookup and downloads.
///
/// Sets a `nodekeeper/<version>` user agent, required by the GitHub API, and a
/// connect timeout. Per-request timeouts are applied by the
/// callers.
pub fn http_client() -> Result<reqwest::Client, NodeError> {
    reqwest::Client::builder()
        .user_agent(concat!("nodekeeper/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| NodeError::network("build http client", e))
}
