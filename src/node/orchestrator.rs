//! Background update loop for the managed node.
//!
//! Every cycle asks the release API for the latest version and compares it to
//! the version in use. A newer release is announced to subscribers; when the
//! orchestrator manages the embedded binary it is also downloaded to the
//! staging path and swapped in.
//!
//! # Concurrency
//!
//! At most one install (probe staged, download, swap) runs at a time. It runs
//! on its own task and is published as a shared future in the in-flight slot.
//! A cycle that finds the slot occupied joins the existing install instead of
//! starting another transfer. The slot is checked and set inside one critical
//! section with no `.await` in between, and cleared when the install settles.
//!
//! Cancelling the loop stops future cycles only; an install already running
//! finishes on its own.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use semver::Version;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::download::{DownloadProgress, Downloader};
use super::paths::NodePaths;
use super::release::ReleaseInfo;
use super::swap::AtomicSwap;
use super::version_probe::VersionProbe;
use crate::constants::{DEFAULT_CHECK_INTERVAL, EVENT_CHANNEL_CAPACITY};
use crate::core::NodeError;

/// Lifecycle notifications published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// A release newer than the version in use was found.
    UpdateAvailable {
        /// The newer release version
        version: Version,
    },
    /// Throttled progress of the running download.
    DownloadProgress(DownloadProgress),
    /// The new binary is installed as the active binary.
    UpdateDownloaded {
        /// The installed version
        version: Version,
    },
    /// Downloading or installing the new binary failed.
    UpdateFailed {
        /// The version that could not be installed
        version: Version,
        /// Failure description
        reason: String,
    },
}

/// Stage of the update state machine last entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    /// No cycle has run yet, or the last one was skipped.
    Idle,
    /// Querying the release API.
    Checking,
    /// The version in use is the latest.
    UpToDate,
    /// A newer release exists.
    UpdateAvailable,
    /// Probing the version of an already staged binary.
    ProbingStaged,
    /// Downloading the new binary.
    Downloading,
    /// The new binary replaced the active one.
    Swapped,
    /// The last install attempt failed.
    Failed,
}

/// Result of one update cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The embedded binary does not exist yet, nothing to update.
    Skipped,
    /// The release API could not be queried.
    RemoteUnavailable,
    /// Already on the latest version.
    UpToDate,
    /// A newer version exists but this orchestrator does not install it.
    UpdateAvailable(Version),
    /// An install is running in the background.
    Downloading(Version),
    /// The version is now the active binary.
    Installed(Version),
    /// The install failed.
    Failed(String),
}

#[derive(Debug, Clone)]
enum InstallOutcome {
    Installed(Version),
    Failed(String),
}

impl From<InstallOutcome> for CycleOutcome {
    fn from(outcome: InstallOutcome) -> Self {
        match outcome {
            InstallOutcome::Installed(version) => Self::Installed(version),
            InstallOutcome::Failed(reason) => Self::Failed(reason),
        }
    }
}

type SharedInstall = Shared<BoxFuture<'static, InstallOutcome>>;

struct Inner {
    paths: NodePaths,
    probe: VersionProbe,
    downloader: Downloader,
    swap: AtomicSwap,
    events: broadcast::Sender<UpdateEvent>,
    manages_internal_node: bool,
    interval: Duration,
    current_version: Mutex<Option<Version>>,
    in_flight: Mutex<Option<SharedInstall>>,
    stage: Mutex<UpdateStage>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configures an [`UpdateOrchestrator`].
pub struct UpdateOrchestratorBuilder {
    paths: NodePaths,
    probe: VersionProbe,
    downloader: Downloader,
    swap: AtomicSwap,
    manages_internal_node: bool,
    interval: Duration,
    current_version: Option<Version>,
}

impl UpdateOrchestratorBuilder {
    /// Replace the swap used to install downloads.
    pub fn swap(mut self, swap: AtomicSwap) -> Self {
        self.swap = swap;
        self
    }

    /// Whether this orchestrator downloads and installs updates itself.
    ///
    /// An orchestrator tracking an externally managed node only announces them.
    pub fn manages_internal_node(mut self, internal: bool) -> Self {
        self.manages_internal_node = internal;
        self
    }

    /// Interval between two cycles of the spawned loop.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Version in use. Probed from the active binary when unknown.
    pub fn current_version(mut self, version: Option<Version>) -> Self {
        self.current_version = version;
        self
    }

    /// Finish configuration.
    pub fn build(self) -> UpdateOrchestrator {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        UpdateOrchestrator {
            inner: Arc::new(Inner {
                paths: self.paths,
                probe: self.probe,
                downloader: self.downloader,
                swap: self.swap,
                events,
                manages_internal_node: self.manages_internal_node,
                interval: self.interval,
                current_version: Mutex::new(self.current_version),
                in_flight: Mutex::new(None),
                stage: Mutex::new(UpdateStage::Idle),
            }),
        }
    }
}

/// Periodically checks for, downloads and installs node updates.
///
/// Cheap to clone; clones share state, so a cycle triggered through one clone
/// sees the download started by another.
///
/// # Examples
///
/// ```rust,no_run
/// use nodekeeper_cli::node::{
///     Downloader, NodePaths, ReleaseLocator, UpdateEvent, UpdateOrchestrator, VersionProbe,
///     http_client,
/// };
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = http_client()?;
/// let paths = NodePaths::new("/opt/node", "idena-node");
/// let locator = ReleaseLocator::new(
///     client.clone(),
///     "https://api.github.com/repos/idena-network/idena-go/releases/latest",
///     "idena-node",
/// );
/// let orchestrator =
///     UpdateOrchestrator::builder(paths, VersionProbe::new(locator), Downloader::new(client))
///         .build();
///
/// let mut events = orchestrator.subscribe();
/// let updates = orchestrator.spawn();
/// while let Ok(event) = events.recv().await {
///     if let UpdateEvent::UpdateDownloaded { version } = event {
///         println!("node updated to {version}, restart it to apply");
///         break;
///     }
/// }
/// updates.cancel();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UpdateOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("node_dir", &self.inner.paths.node_dir())
            .field("manages_internal_node", &self.inner.manages_internal_node)
            .field("interval", &self.inner.interval)
            .field("stage", &self.state())
            .finish_non_exhaustive()
    }
}

impl UpdateOrchestrator {
    /// Start configuring an orchestrator for the node at `paths`.
    ///
    /// Defaults: manages the embedded binary, ten minute interval, version in
    /// use probed from the active binary.
    pub fn builder(
        paths: NodePaths,
        probe: VersionProbe,
        downloader: Downloader,
    ) -> UpdateOrchestratorBuilder {
        UpdateOrchestratorBuilder {
            paths,
            probe,
            downloader,
            swap: AtomicSwap::new(),
            manages_internal_node: true,
            interval: DEFAULT_CHECK_INTERVAL,
            current_version: None,
        }
    }

    /// Receive [`UpdateEvent`]s published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.events.subscribe()
    }

    /// The version currently considered in use, if known.
    pub fn current_version(&self) -> Option<Version> {
        lock(&self.inner.current_version).clone()
    }

    /// The stage last entered.
    pub fn state(&self) -> UpdateStage {
        *lock(&self.inner.stage)
    }

    /// Whether an install is in flight.
    pub fn is_downloading(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    /// Run one cycle now, waiting for the install it started or joined.
    pub async fn check_now(&self) -> CycleOutcome {
        self.run_cycle(true).await
    }

    /// Download and install `release` now, regardless of the version in use.
    ///
    /// Joins the install in flight if there is one, so this never starts a
    /// second transfer.
    pub async fn install_release(&self, release: ReleaseInfo) -> CycleOutcome {
        self.join_or_start_install(release).await.into()
    }

    /// Start the recurring loop. The first cycle runs immediately.
    ///
    /// Dropping the returned handle also stops the loop.
    pub fn spawn(&self) -> UpdateLoopHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let this = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel_rx.changed() => break,
                }

                let cycle = this.clone();
                match tokio::spawn(async move { cycle.run_cycle(false).await }).await {
                    Ok(outcome) => debug!("Update cycle finished: {outcome:?}"),
                    Err(e) => warn!("Update cycle aborted: {e}"),
                }
            }
            debug!("Update loop stopped");
        });

        UpdateLoopHandle { cancel_tx, task }
    }

    async fn run_cycle(&self, wait_for_install: bool) -> CycleOutcome {
        let inner = &self.inner;

        if inner.manages_internal_node
            && !tokio::fs::try_exists(inner.paths.active_binary()).await.unwrap_or(false)
        {
            debug!("No node binary installed yet, skipping update check");
            self.set_stage(UpdateStage::Idle);
            return CycleOutcome::Skipped;
        }

        self.set_stage(UpdateStage::Checking);
        let release = match inner.probe.locator().latest().await {
            Ok(release) => release,
            Err(e) => {
                warn!("Update check failed: {e}");
                self.set_stage(UpdateStage::Idle);
                return CycleOutcome::RemoteUnavailable;
            }
        };

        let current = self.resolve_current_version().await;
        if current.as_ref().is_some_and(|current| release.version <= *current) {
            debug!("Node is up to date ({})", release.version);
            self.set_stage(UpdateStage::UpToDate);
            return CycleOutcome::UpToDate;
        }

        let version = release.version.clone();
        info!(
            "Node update available: {} -> {version}",
            current.map_or_else(|| "unknown".to_string(), |v| v.to_string())
        );
        self.set_stage(UpdateStage::UpdateAvailable);
        self.emit(UpdateEvent::UpdateAvailable {
            version: version.clone(),
        });

        if !inner.manages_internal_node {
            return CycleOutcome::UpdateAvailable(version);
        }

        let install = self.join_or_start_install(release);
        if wait_for_install {
            install.await.into()
        } else {
            CycleOutcome::Downloading(version)
        }
    }

    async fn resolve_current_version(&self) -> Option<Version> {
        if let Some(version) = self.current_version() {
            return Some(version);
        }
        if !self.inner.manages_internal_node {
            return None;
        }

        let probed = self.inner.probe.local_version(&self.inner.paths.active_binary()).await;
        if let Some(version) = &probed {
            *lock(&self.inner.current_version) = Some(version.clone());
        }
        probed
    }

    fn join_or_start_install(&self, release: ReleaseInfo) -> SharedInstall {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(existing) = slot.as_ref() {
            debug!("An install is already in flight, joining it");
            return existing.clone();
        }

        let this = self.clone();
        let task = tokio::spawn(async move {
            let outcome = this.install(release).await;
            *lock(&this.inner.in_flight) = None;
            outcome
        });

        let install = async move {
            task.await
                .unwrap_or_else(|e| InstallOutcome::Failed(format!("install task aborted: {e}")))
        }
        .boxed()
        .shared();

        *slot = Some(install.clone());
        install
    }

    async fn install(&self, release: ReleaseInfo) -> InstallOutcome {
        let version = release.version.clone();

        match self.download_and_swap(&release).await {
            Ok(()) => {
                *lock(&self.inner.current_version) = Some(version.clone());
                self.set_stage(UpdateStage::Swapped);
                info!("Node binary updated to {version}");
                self.emit(UpdateEvent::UpdateDownloaded {
                    version: version.clone(),
                });
                InstallOutcome::Installed(version)
            }
            Err(e) => {
                error!("Failed to update node to {version}: {e}");
                self.set_stage(UpdateStage::Failed);
                self.emit(UpdateEvent::UpdateFailed {
                    version,
                    reason: e.to_string(),
                });
                InstallOutcome::Failed(e.to_string())
            }
        }
    }

    async fn download_and_swap(&self, release: &ReleaseInfo) -> Result<(), NodeError> {
        let paths = &self.inner.paths;
        let staged = paths.staged_binary();

        self.set_stage(UpdateStage::ProbingStaged);
        let staged_version = self.inner.probe.local_version(&staged).await;

        if staged_version.as_ref() == Some(&release.version) {
            info!("Staged binary is already {}, skipping download", release.version);
        } else {
            if tokio::fs::try_exists(&staged).await.unwrap_or(false) {
                debug!("Removing outdated staged binary {}", staged.display());
                tokio::fs::remove_file(&staged).await.map_err(|e| NodeError::FileSystemError {
                    operation: "remove outdated staged binary".to_string(),
                    path: staged.display().to_string(),
                    reason: e.to_string(),
                })?;
            }

            self.set_stage(UpdateStage::Downloading);
            let events = self.inner.events.clone();
            let forward = move |progress: DownloadProgress| {
                let _ = events.send(UpdateEvent::DownloadProgress(progress));
            };
            self.inner
                .downloader
                .download(&release.asset_url, &staged, &release.version, &forward)
                .await?;
        }

        self.inner.swap.replace(&paths.active_binary(), &staged).await
    }

    fn set_stage(&self, stage: UpdateStage) {
        *lock(&self.inner.stage) = stage;
    }

    fn emit(&self, event: UpdateEvent) {
        // No subscribers is not an error
        let _ = self.inner.events.send(event);
    }
}

/// Controls a loop started with [`UpdateOrchestrator::spawn`].
#[derive(Debug)]
pub struct UpdateLoopHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl UpdateLoopHandle {
    /// Stop scheduling cycles. A running install is not interrupted.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Whether the loop has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to stop after [`cancel`](Self::cancel).
    pub async fn join(self) {
        let Self { cancel_tx, task } = self;
        if let Err(e) = task.await {
            warn!("Update loop task failed: {e}");
        }
        drop(cancel_tx);
    }
}
