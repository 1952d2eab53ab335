//! Global configuration for nodekeeper.
//!
//! The configuration lives in a single TOML file. Every key is optional; a
//! missing file or section falls back to the defaults.
//!
//! # Location
//!
//! - **Unix/macOS**: `~/.nodekeeper/config.toml`
//! - **Windows**: `%LOCALAPPDATA%\nodekeeper\config.toml`
//! - **Override**: `NODEKEEPER_CONFIG_PATH` or the `--config` flag
//!
//! # Format
//!
//! ```toml
//! [node]
//! dir = "~/.nodekeeper/node"
//! binary_name = "idena-node"
//! rpc_port = 9009
//! p2p_port = 40405
//! ipfs_port = 40403
//! api_key = "5f1c0c6e2b8d4e0f9a3b7c1d2e4f6a8b"
//! internal = true
//!
//! [release]
//! api_url = "https://api.github.com/repos/idena-network/idena-go/releases/latest"
//! request_timeout = 30
//! retries = 3
//!
//! [updates]
//! check_interval = 600
//! stop_grace_period = 10
//! ```
//!
//! The file may hold the node API key, so it is written with mode `0600` on Unix.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::{
    DEFAULT_BINARY_NAME, DEFAULT_CHECK_INTERVAL, DEFAULT_IPFS_PORT, DEFAULT_P2P_PORT,
    DEFAULT_RELEASE_API_URL, DEFAULT_REQUEST_RETRIES, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RPC_PORT,
    DEFAULT_STOP_GRACE_PERIOD,
};
use crate::core::NodeError;
use crate::node::{NodeLaunchConfig, NodePaths, ReleaseLocator};
use crate::utils::platform::{get_home_dir, resolve_path};

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "NODEKEEPER_CONFIG_PATH";

/// `[node]` section: where the node lives and how it is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Node directory. `~` and environment variables are expanded.
    pub dir: String,
    /// Binary name without platform suffix.
    pub binary_name: String,
    /// `--rpcport`
    pub rpc_port: u16,
    /// `--port`
    pub p2p_port: u16,
    /// `--ipfsport`
    pub ipfs_port: u16,
    /// Node API key. Generated on first `run` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Whether nodekeeper downloads and updates the binary itself.
    pub internal: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            dir: "~/.nodekeeper/node".to_string(),
            binary_name: DEFAULT_BINARY_NAME.to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            p2p_port: DEFAULT_P2P_PORT,
            ipfs_port: DEFAULT_IPFS_PORT,
            api_key: None,
            internal: true,
        }
    }
}

/// `[release]` section: where releases are looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseSettings {
    /// Release API endpoint returning the latest release.
    pub api_url: String,
    /// Timeout of a single API request, in seconds.
    pub request_timeout: u64,
    /// Attempts per lookup.
    pub retries: usize,
    /// Asset name prefix overriding the platform default (`<binary>-linux`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_prefix: Option<String>,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_RELEASE_API_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            retries: DEFAULT_REQUEST_RETRIES,
            asset_prefix: None,
        }
    }
}

/// `[updates]` section: update loop and shutdown timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Seconds between two update checks.
    pub check_interval: u64,
    /// Seconds the node gets to exit after an interrupt before it is killed.
    pub stop_grace_period: u64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL.as_secs(),
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD.as_secs(),
        }
    }
}

/// User-wide nodekeeper configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use nodekeeper_cli::config::GlobalConfig;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = GlobalConfig::load_with_optional(None).await?;
/// let paths = config.node_paths()?;
/// println!("node binary: {}", paths.active_binary().display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Node location and launch settings.
    pub node: NodeSettings,
    /// Release lookup settings.
    pub release: ReleaseSettings,
    /// Update loop settings.
    pub updates: UpdateSettings,
}

impl GlobalConfig {
    /// Load from the default location, or defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from `path` when given, otherwise from [`resolve_path`](Self::resolve_path).
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid TOML, or
    /// holds invalid values (see [`validate`](Self::validate)).
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .map_err(NodeError::from)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Save to `path` as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        // The API key must not be readable by other users
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mut perms = fs::metadata(path)
                .await
                .with_context(|| format!("Failed to read permissions for {}", path.display()))?
                .permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms).await.with_context(|| {
                format!("Failed to set secure permissions on {}", path.display())
            })?;
        }

        Ok(())
    }

    /// The platform default config location.
    ///
    /// # Errors
    ///
    /// Returns an error if the home (or, on Windows, local data) directory
    /// cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("nodekeeper")
        } else {
            get_home_dir()?.join(".nodekeeper")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// The config file to use: `explicit`, then `NODEKEEPER_CONFIG_PATH`, then
    /// [`default_path`](Self::default_path).
    ///
    /// # Errors
    ///
    /// Returns an error if no explicit path is given and the default cannot be
    /// determined.
    pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Self::default_path(),
        }
    }

    /// Reject values the node manager cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ConfigError`] naming the offending key.
    pub fn validate(&self) -> Result<(), NodeError> {
        let invalid = |message: &str| {
            Err(NodeError::ConfigError {
                message: message.to_string(),
            })
        };

        if self.node.binary_name.trim().is_empty() {
            return invalid("node.binary_name must not be empty");
        }
        if [self.node.rpc_port, self.node.p2p_port, self.node.ipfs_port].contains(&0) {
            return invalid("node ports must be between 1 and 65535");
        }
        if self.release.retries == 0 {
            return invalid("release.retries must be at least 1");
        }
        if self.updates.check_interval == 0 {
            return invalid("updates.check_interval must be at least 1 second");
        }
        Ok(())
    }

    /// Generate and store an API key if none is configured.
    ///
    /// Returns `true` when a new key was generated (and the config should be saved).
    pub fn ensure_api_key(&mut self) -> bool {
        if self.node.api_key.as_deref().is_some_and(|key| !key.is_empty()) {
            return false;
        }
        self.node.api_key = Some(uuid::Uuid::new_v4().simple().to_string());
        true
    }

    /// The node directory with `~` and variables expanded.
    ///
    /// # Errors
    ///
    /// Returns an error if the path references an undefined variable.
    pub fn node_dir(&self) -> Result<PathBuf> {
        resolve_path(&self.node.dir)
    }

    /// The node filesystem layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the node directory cannot be expanded.
    pub fn node_paths(&self) -> Result<NodePaths> {
        Ok(NodePaths::new(self.node_dir()?, self.node.binary_name.clone()))
    }

    /// Everything the supervisor needs to launch the node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node directory cannot be expanded.
    pub fn launch_config(&self) -> Result<NodeLaunchConfig> {
        let mut launch = NodeLaunchConfig::new(self.node_paths()?);
        launch.rpc_port = self.node.rpc_port;
        launch.p2p_port = self.node.p2p_port;
        launch.ipfs_port = self.node.ipfs_port;
        launch.api_key = self.node.api_key.clone();
        launch.stop_grace_period = self.stop_grace_period();
        Ok(launch)
    }

    /// A release locator configured from the `[release]` section.
    pub fn release_locator(&self, client: reqwest::Client) -> ReleaseLocator {
        let locator = ReleaseLocator::new(client, &self.release.api_url, &self.node.binary_name)
            .with_request_timeout(Duration::from_secs(self.release.request_timeout))
            .with_retries(self.release.retries);

        match &self.release.asset_prefix {
            Some(prefix) => locator.with_asset_prefix(prefix),
            None => locator,
        }
    }

    /// Interval between update checks.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.updates.check_interval)
    }

    /// Grace period between the interrupt and the kill on stop.
    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.updates.stop_grace_period)
    }
}
