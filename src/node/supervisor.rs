//! Launching, observing and stopping the node process.
//!
//! [`ProcessSupervisor::start`] spawns the active binary with a fixed argument
//! layout and hands back a [`NodeProcessHandle`]; the supervisor itself keeps no
//! reference to the child. Three background tasks serve each process:
//!
//! - a stdout reader forwarding lines to the [`LogSink`] and `output.log`
//! - a stderr reader forwarding lines to the sink and chunks to `error.log`
//! - a waiter owning the child, recording its exit code as soon as it is
//!   reaped and notifying once the output has been drained
//!
//! Stopping goes through one `terminate()` per platform: an interrupt signal
//! on Unix, a forced kill elsewhere. If the node ignores the interrupt for
//! longer than the grace period it is killed.

use semver::Version;
use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::paths::NodePaths;
use super::version_probe::probe_binary_version;
use crate::constants::{
    API_KEY_MIN_VERSION, DEFAULT_IPFS_PORT, DEFAULT_P2P_PORT, DEFAULT_RPC_PORT,
    DEFAULT_STOP_GRACE_PERIOD, VERSION_PROBE_TIMEOUT,
};
use crate::core::NodeError;

/// Upper bound for the log readers to drain after the process exited.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for a killed process to be reaped.
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to launch the node.
#[derive(Debug, Clone)]
pub struct NodeLaunchConfig {
    /// Filesystem layout of the node.
    pub paths: NodePaths,
    /// `--rpcport`
    pub rpc_port: u16,
    /// `--port`
    pub p2p_port: u16,
    /// `--ipfsport`
    pub ipfs_port: u16,
    /// `--apikey`, only passed to versions newer than `API_KEY_MIN_VERSION`.
    pub api_key: Option<String>,
    /// How long `stop` waits after the interrupt before killing the node.
    pub stop_grace_period: Duration,
}

impl NodeLaunchConfig {
    /// Launch config with default ports, no API key and the default grace period.
    pub fn new(paths: NodePaths) -> Self {
        Self {
            paths,
            rpc_port: DEFAULT_RPC_PORT,
            p2p_port: DEFAULT_P2P_PORT,
            ipfs_port: DEFAULT_IPFS_PORT,
            api_key: None,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
        }
    }
}

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// One line of node output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Originating stream.
    pub stream: LogStream,
    /// Line content without the trailing newline.
    pub line: String,
}

/// Receiver of node output lines.
pub trait LogSink: Send + Sync {
    /// Called for every line the node prints.
    fn line(&self, line: LogLine);
}

impl<F> LogSink for F
where
    F: Fn(LogLine) + Send + Sync,
{
    fn line(&self, line: LogLine) {
        self(line);
    }
}

impl LogSink for mpsc::UnboundedSender<LogLine> {
    fn line(&self, line: LogLine) {
        let _ = self.send(line);
    }
}

/// Build the node's argument vector.
///
/// The order is fixed: `--datadir`, `--rpcport`, `--port`, `--ipfsport`, then
/// `--apikey` when a key is configured and `local_version` is strictly newer
/// than [`API_KEY_MIN_VERSION`], then `--config` when the override file exists.
/// An unknown version never receives the key.
pub fn build_args(
    config: &NodeLaunchConfig,
    local_version: Option<&Version>,
    config_file_exists: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--datadir".into(),
        config.paths.data_dir().into_os_string(),
        "--rpcport".into(),
        config.rpc_port.to_string().into(),
        "--port".into(),
        config.p2p_port.to_string().into(),
        "--ipfsport".into(),
        config.ipfs_port.to_string().into(),
    ];

    if let Some(key) = &config.api_key
        && supports_api_key(local_version)
    {
        args.push("--apikey".into());
        args.push(key.into());
    }

    if config_file_exists {
        args.push("--config".into());
        args.push(config.paths.config_file().into_os_string());
    }

    args
}

fn supports_api_key(version: Option<&Version>) -> bool {
    match (version, Version::parse(API_KEY_MIN_VERSION)) {
        (Some(version), Ok(min)) => *version > min,
        _ => false,
    }
}

/// Handle to a running (or exited) node process.
///
/// Owned by whoever called [`ProcessSupervisor::start`]. Cloning yields another
/// view on the same process.
#[derive(Debug, Clone)]
pub struct NodeProcessHandle {
    pid: u32,
    reaped_rx: watch::Receiver<Option<i32>>,
    exit_rx: watch::Receiver<Option<i32>>,
    kill_tx: mpsc::UnboundedSender<()>,
    grace_period: Duration,
}

impl NodeProcessHandle {
    /// Operating system process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code, once the process has terminated.
    ///
    /// Set as soon as the process is reaped, possibly before the exit
    /// notification, which also waits for the output to be drained. Processes
    /// killed by a signal report `128 + signal` on Unix.
    pub fn exit_code(&self) -> Option<i32> {
        *self.reaped_rx.borrow()
    }

    /// Whether the process has terminated.
    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Wait for the process to exit and its output to be drained, then return
    /// the exit code.
    pub async fn wait_exit(&self) -> i32 {
        let mut rx = self.exit_rx.clone();
        let code = match rx.wait_for(Option::is_some).await {
            Ok(code) => *code,
            Err(_) => *self.exit_rx.borrow(),
        };
        code.unwrap_or(-1)
    }

    /// A receiver that changes to `Some(code)` once the process has exited and
    /// its output has been drained.
    pub fn exit_notifications(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    fn request_kill(&self) -> Result<(), NodeError> {
        self.kill_tx.send(()).map_err(|_| NodeError::ProcessControlError {
            pid: self.pid,
            reason: "process supervisor task is gone".to_string(),
        })
    }
}

/// Spawns and stops the node binary.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    probe_timeout: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    /// Create a supervisor with the default version probe timeout.
    pub fn new() -> Self {
        Self {
            probe_timeout: VERSION_PROBE_TIMEOUT,
        }
    }

    /// Bound the `--version` probe run before launch.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Launch the node described by `config`.
    ///
    /// Output lines are delivered to `sink` and appended to the log files.
    ///
    /// # Errors
    ///
    /// - [`NodeError::ProcessSpawnError`] if the active binary is missing (checked
    ///   before anything else happens) or cannot be executed
    /// - [`NodeError::FileSystemError`] if the log directory cannot be created
    pub async fn start(
        &self,
        config: &NodeLaunchConfig,
        sink: impl LogSink + 'static,
    ) -> Result<NodeProcessHandle, NodeError> {
        let binary = config.paths.active_binary();
        if !binary.is_file() {
            return Err(NodeError::ProcessSpawnError {
                path: binary.display().to_string(),
                reason: "binary not found".to_string(),
            });
        }

        config.paths.ensure_dirs().await?;

        let version = probe_binary_version(&binary, self.probe_timeout).await;
        let config_exists =
            tokio::fs::try_exists(config.paths.config_file()).await.unwrap_or(false);
        let args = build_args(config, version.as_ref(), config_exists);
        debug!("Starting {} with {} argument(s)", binary.display(), args.len());

        let mut command = Command::new(&binary);
        command
            .args(&args)
            .current_dir(config.paths.node_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: a terminal Ctrl-C reaches the node only through `stop`
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| NodeError::ProcessSpawnError {
                path: binary.display().to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id().ok_or_else(|| NodeError::ProcessSpawnError {
            path: binary.display().to_string(),
            reason: "process exited before its pid could be read".to_string(),
        })?;
        info!(
            "Started node {} (pid {pid}, version {})",
            binary.display(),
            version.map_or_else(|| "unknown".to_string(), |v| v.to_string())
        );

        let sink: Arc<dyn LogSink> = Arc::new(sink);
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_stdout(
                stdout,
                config.paths.output_log(),
                Arc::clone(&sink),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_stderr(
                stderr,
                config.paths.error_log(),
                Arc::clone(&sink),
            )));
        }

        let (reaped_tx, reaped_rx) = watch::channel(None);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Some(()) = kill_rx.recv() => {
                    debug!("Killing node process {pid}");
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill node process {pid}: {e}");
                    }
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!("Failed to wait for node process {pid}: {e}");
                    -1
                }
            };

            info!("Node process {pid} exited with code {code}");
            let _ = reaped_tx.send(Some(code));
            drain_readers(readers).await;
            let _ = exit_tx.send(Some(code));
        });

        Ok(NodeProcessHandle {
            pid,
            reaped_rx,
            exit_rx,
            kill_tx,
            grace_period: config.stop_grace_period,
        })
    }

    /// Stop the node behind `handle`.
    ///
    /// Resolves with a message naming the pid. A process that already exited is
    /// not signalled again.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ProcessControlError`] if the node could not be
    /// signalled or did not exit even after being killed.
    pub async fn stop(&self, handle: &NodeProcessHandle) -> Result<String, NodeError> {
        let pid = handle.pid();
        if let Some(code) = handle.exit_code() {
            return Ok(format!("node process {pid} already exited with code {code}"));
        }

        if let Err(e) = terminate(handle).await {
            // The process may have exited between the check and the signal
            if let Some(code) = handle.exit_code() {
                return Ok(format!("node process {pid} already exited with code {code}"));
            }
            return Err(e);
        }

        match tokio::time::timeout(handle.grace_period, handle.wait_exit()).await {
            Ok(code) => Ok(format!("node process {pid} stopped with code {code}")),
            Err(_) => {
                warn!(
                    "Node process {pid} did not exit within {:?}, killing it",
                    handle.grace_period
                );
                handle.request_kill()?;
                let code = tokio::time::timeout(KILL_WAIT_TIMEOUT, handle.wait_exit())
                    .await
                    .map_err(|_| NodeError::ProcessControlError {
                        pid,
                        reason: "process did not exit after being killed".to_string(),
                    })?;
                Ok(format!("node process {pid} killed with code {code}"))
            }
        }
    }
}

/// Send SIGINT once through `kill -INT`.
#[cfg(unix)]
async fn terminate(handle: &NodeProcessHandle) -> Result<(), NodeError> {
    let pid = handle.pid();
    debug!("Sending interrupt to node process {pid}");

    let status = Command::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| NodeError::ProcessControlError {
            pid,
            reason: format!("failed to run kill: {e}"),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(NodeError::ProcessControlError {
            pid,
            reason: format!("kill -INT exited with {status}"),
        })
    }
}

/// Forcefully kill the process and wait for it to exit.
#[cfg(not(unix))]
async fn terminate(handle: &NodeProcessHandle) -> Result<(), NodeError> {
    debug!("Killing node process {}", handle.pid());
    handle.request_kill()?;
    handle.wait_exit().await;
    Ok(())
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    let drained = tokio::time::timeout(LOG_DRAIN_TIMEOUT, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!("Node output still open after exit, not waiting for it");
    }
}

async fn open_log(path: &Path) -> Option<tokio::fs::File> {
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!("Failed to open {}: {e}", path.display());
            None
        }
    }
}

async fn pump_stdout(
    stdout: impl AsyncRead + Unpin,
    log_path: std::path::PathBuf,
    sink: Arc<dyn LogSink>,
) {
    let mut log = open_log(&log_path).await;
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Stopped reading node stdout: {e}");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();

        if let Some(file) = log.as_mut()
            && let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await
        {
            warn!("Failed to write {}: {e}", log_path.display());
            log = None;
        }

        sink.line(LogLine {
            stream: LogStream::Stdout,
            line,
        });
    }

    if let Some(mut file) = log {
        let _ = file.flush().await;
    }
}

async fn pump_stderr(
    stderr: impl AsyncRead + Unpin,
    log_path: std::path::PathBuf,
    sink: Arc<dyn LogSink>,
) {
    let mut log = open_log(&log_path).await;
    let mut reader = stderr;
    let mut buf = vec![0u8; 8192];
    let mut carry: Vec<u8> = Vec::new();
    let mut pending = String::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Stopped reading node stderr: {e}");
                break;
            }
        };
        carry.extend_from_slice(&buf[..n]);
        let complete = complete_utf8_prefix(&carry);
        if complete == 0 {
            continue;
        }
        let chunk = String::from_utf8_lossy(&carry[..complete]).into_owned();
        carry.drain(..complete);

        if let Some(file) = log.as_mut()
            && let Err(e) = file.write_all(error_log_entry(&chunk).as_bytes()).await
        {
            warn!("Failed to write {}: {e}", log_path.display());
            log = None;
        }

        pending.push_str(&chunk);
        while let Some(pos) = pending.find('\n') {
            let line: String = pending.drain(..=pos).collect();
            sink.line(LogLine {
                stream: LogStream::Stderr,
                line: line.trim_end_matches(['\r', '\n']).to_string(),
            });
        }
    }

    if !carry.is_empty() {
        let rest = String::from_utf8_lossy(&carry).into_owned();
        if let Some(file) = log.as_mut()
            && let Err(e) = file.write_all(error_log_entry(&rest).as_bytes()).await
        {
            warn!("Failed to write {}: {e}", log_path.display());
        }
        pending.push_str(&rest);
    }
    if !pending.is_empty() {
        sink.line(LogLine {
            stream: LogStream::Stderr,
            line: pending,
        });
    }
    if let Some(mut file) = log {
        let _ = file.flush().await;
    }
}

/// Length of `bytes` without a trailing multi-byte character cut off by a read.
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for i in (len.saturating_sub(3)..len).rev() {
        let needed = match bytes[i] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if len - i < needed { i } else { len };
    }
    len
}

fn error_log_entry(chunk: &str) -> String {
    let mut entry = format!(
        "-----------start [{}]-----------\n{chunk}",
        chrono::Local::now().to_rfc3339()
    );
    if !chunk.ends_with('\n') {
        entry.push('\n');
    }
    entry.push_str("-----------end-------------\n");
    entry
}
