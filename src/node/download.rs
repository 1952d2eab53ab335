//! Streaming download of node binaries to the staging path.
//!
//! The body is written to `<dest>.part` and renamed to `dest` once it has been
//! flushed and synced, so `dest` only ever exists as a complete file. A
//! destination that already exists is treated as done.

use futures::StreamExt;
use reqwest::Client;
use semver::Version;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::{DOWNLOAD_IDLE_TIMEOUT, PROGRESS_THROTTLE};
use crate::core::NodeError;

/// A progress report for one download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Bytes written so far.
    pub bytes_transferred: u64,
    /// Body size from `Content-Length`, if the server sent one.
    pub total_bytes: Option<u64>,
    /// Completion in the range `0.0..=100.0`; `0.0` while the size is unknown.
    pub percent: f64,
    /// Average transfer rate since the download started.
    pub bytes_per_second: f64,
    /// Version being downloaded.
    pub version: Version,
}

/// Receiver of download progress reports.
pub trait ProgressSink: Send + Sync {
    /// Called at most once per throttle interval.
    fn report(&self, progress: DownloadProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    fn report(&self, progress: DownloadProgress) {
        self(progress);
    }
}

impl ProgressSink for mpsc::UnboundedSender<DownloadProgress> {
    fn report(&self, progress: DownloadProgress) {
        // A dropped receiver only means nobody is watching
        let _ = self.send(progress);
    }
}

/// Sink that discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: DownloadProgress) {}
}

/// Turns byte counts into throttled [`DownloadProgress`] reports.
#[derive(Debug)]
struct ProgressTracker {
    started: Instant,
    last_report: Instant,
    throttle: Duration,
    total: Option<u64>,
    transferred: u64,
    version: Version,
}

impl ProgressTracker {
    fn new(started: Instant, throttle: Duration, total: Option<u64>, version: Version) -> Self {
        Self {
            started,
            last_report: started,
            throttle,
            total,
            transferred: 0,
            version,
        }
    }

    fn record(&mut self, bytes: u64, now: Instant) -> Option<DownloadProgress> {
        self.transferred += bytes;
        if now.saturating_duration_since(self.last_report) < self.throttle {
            return None;
        }
        self.last_report = now;

        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let percent = match self.total {
            Some(total) if total > 0 => {
                (self.transferred as f64 / total as f64 * 100.0).min(100.0)
            }
            _ => 0.0,
        };
        let bytes_per_second = if elapsed > 0.0 {
            self.transferred as f64 / elapsed
        } else {
            0.0
        };

        Some(DownloadProgress {
            bytes_transferred: self.transferred,
            total_bytes: self.total,
            percent,
            bytes_per_second,
            version: self.version.clone(),
        })
    }
}

/// Streams node binaries from a URL to a local path.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    throttle: Duration,
    idle_timeout: Duration,
}

impl Downloader {
    /// Create a downloader using `client` for requests.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            throttle: PROGRESS_THROTTLE,
            idle_timeout: DOWNLOAD_IDLE_TIMEOUT,
        }
    }

    /// Set the minimum interval between two progress reports.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Set how long the host may stay silent, waiting for the response headers
    /// or between two body chunks, before the download fails.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Download `url` into `dest`, reporting progress for `version` to `sink`.
    ///
    /// Returns immediately, without any request or report, if `dest` exists.
    /// On Unix the downloaded file is made executable.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::DownloadError`] on a request error, a non-success
    /// status, a stream error or stall, or a write error. No partial file is
    /// left behind.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        version: &Version,
        sink: &dyn ProgressSink,
    ) -> Result<(), NodeError> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            debug!("{} already exists, skipping download", dest.display());
            return Ok(());
        }

        let part = part_path(dest);
        info!("Downloading {version} from {url}");

        match self.stream_into_place(url, &part, dest, version, sink).await {
            Ok(bytes) => {
                info!("Downloaded {bytes} bytes to {}", dest.display());
                Ok(())
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&part).await
                    && remove_err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to remove partial download {}: {remove_err}", part.display());
                }
                Err(e)
            }
        }
    }

    async fn stream_into_place(
        &self,
        url: &str,
        part: &Path,
        dest: &Path,
        version: &Version,
        sink: &dyn ProgressSink,
    ) -> Result<u64, NodeError> {
        let bytes = self.stream_to(url, part, version, sink).await?;
        tokio::fs::rename(part, dest).await.map_err(|e| {
            download_error(url, format!("failed to move download into place: {e}"))
        })?;
        Ok(bytes)
    }

    async fn stream_to(
        &self,
        url: &str,
        part: &Path,
        version: &Version,
        sink: &dyn ProgressSink,
    ) -> Result<u64, NodeError> {
        let started = Instant::now();

        let response = tokio::time::timeout(self.idle_timeout, self.client.get(url).send())
            .await
            .map_err(|_| {
                download_error(url, format!("no response received for {:?}", self.idle_timeout))
            })?
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| download_error(url, e))?;

        if let Some(parent) = part.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                download_error(url, format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| download_error(url, format!("failed to create {}: {e}", part.display())))?;

        let mut tracker =
            ProgressTracker::new(started, self.throttle, response.content_length(), version.clone());
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| {
                    download_error(url, format!("no data received for {:?}", self.idle_timeout))
                })?;

            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| download_error(url, e))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| download_error(url, format!("write failed: {e}")))?;

            if let Some(progress) = tracker.record(chunk.len() as u64, Instant::now()) {
                sink.report(progress);
            }
        }

        file.flush()
            .await
            .map_err(|e| download_error(url, format!("flush failed: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| download_error(url, format!("sync failed: {e}")))?;

        // Staged binaries are probed with `--version` before they are swapped in
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| download_error(url, format!("failed to make executable: {e}")))?;
        }

        Ok(tracker.transferred)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn download_error(url: &str, reason: impl std::fmt::Display) -> NodeError {
    NodeError::DownloadError {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
