use std::path::{Path, PathBuf};

use crate::constants::STAGING_PREFIX;
use crate::core::NodeError;
use crate::utils::platform::executable_name;

/// Filesystem layout of a managed node.
///
/// Every file the subsystem touches lives under one node directory:
///
/// ```text
/// <node_dir>/
/// ├── idena-node[.exe]        active binary
/// ├── new-idena-node[.exe]    staging binary (download destination)
/// ├── config.json             optional override, passed as --config
/// └── datadir/                passed as --datadir
///     └── logs/
///         ├── output.log
///         └── error.log
/// ```
///
/// The active and staging paths are always distinct files in the same
/// directory, so promoting the staging file is a same-filesystem rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePaths {
    node_dir: PathBuf,
    binary_name: String,
}

impl NodePaths {
    /// Create the layout for `binary_name` (without `.exe`) under `node_dir`.
    pub fn new(node_dir: impl Into<PathBuf>, binary_name: impl Into<String>) -> Self {
        Self {
            node_dir: node_dir.into(),
            binary_name: binary_name.into(),
        }
    }

    /// The node directory.
    pub fn node_dir(&self) -> &Path {
        &self.node_dir
    }

    /// Binary name without platform suffix (e.g. `idena-node`).
    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    /// Path of the binary that gets launched.
    pub fn active_binary(&self) -> PathBuf {
        self.node_dir.join(executable_name(&self.binary_name))
    }

    /// Path downloads are written to before they are swapped in.
    pub fn staged_binary(&self) -> PathBuf {
        self.node_dir
            .join(executable_name(&format!("{STAGING_PREFIX}{}", self.binary_name)))
    }

    /// Optional user override config.
    pub fn config_file(&self) -> PathBuf {
        self.node_dir.join("config.json")
    }

    /// The node's own state directory.
    pub fn data_dir(&self) -> PathBuf {
        self.node_dir.join("datadir")
    }

    /// Directory holding the supervisor-written logs.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    /// Node standard output log.
    pub fn output_log(&self) -> PathBuf {
        self.logs_dir().join("output.log")
    }

    /// Node standard error log.
    pub fn error_log(&self) -> PathBuf {
        self.logs_dir().join("error.log")
    }

    /// Create the node, data and log directories if they are missing.
    pub async fn ensure_dirs(&self) -> Result<(), NodeError> {
        let logs = self.logs_dir();
        tokio::fs::create_dir_all(&logs).await.map_err(|e| NodeError::FileSystemError {
            operation: "create log directory".to_string(),
            path: logs.display().to_string(),
            reason: e.to_string(),
        })
    }
}
