//! Global constants used throughout the nodekeeper codebase.
//!
//! This module contains polling intervals, retry parameters, timeouts and the
//! fixed values of the node's command-line surface.

use std::time::Duration;

/// Name of the node binary as published in release assets (without `.exe`).
pub const DEFAULT_BINARY_NAME: &str = "idena-node";

/// Release API queried for the latest published node version.
pub const DEFAULT_RELEASE_API_URL: &str =
    "https://api.github.com/repos/idena-network/idena-go/releases/latest";

/// Prefix prepended to the binary name for the staging (download) file.
pub const STAGING_PREFIX: &str = "new-";

/// Default node RPC port (`--rpcport`).
pub const DEFAULT_RPC_PORT: u16 = 9009;

/// Default node P2P port (`--port`).
pub const DEFAULT_P2P_PORT: u16 = 40405;

/// Default auxiliary IPFS port (`--ipfsport`).
pub const DEFAULT_IPFS_PORT: u16 = 40403;

/// Node versions at or below this one do not understand `--apikey`.
///
/// The argument is only passed when the probed local version is strictly
/// greater than this value.
pub const API_KEY_MIN_VERSION: &str = "0.18.1";

/// Interval between two update cycles of the orchestrator (10 minutes).
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(600);

/// Maximum number of attempts to delete the active binary during a swap.
pub const SWAP_MAX_ATTEMPTS: u32 = 5;

/// Pause between two deletion attempts during a swap.
pub const SWAP_RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Minimum interval between two download progress reports.
pub const PROGRESS_THROTTLE: Duration = Duration::from_secs(1);

/// Upper bound for a `<binary> --version` probe.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a node gets to exit after the interrupt signal before it is killed.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Timeout for a single release API request (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of attempts for a release API request before giving up.
pub const DEFAULT_REQUEST_RETRIES: usize = 3;

/// Timeout for establishing an HTTP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum silence on a download stream before the transfer is abandoned.
pub const DOWNLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Starting delay for exponential backoff between release API retries (100ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 100;

/// Maximum backoff delay between release API retries (2s).
pub const MAX_BACKOFF_DELAY_MS: u64 = 2_000;

/// Capacity of the update event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
