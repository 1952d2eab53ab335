//! Error handling for nodekeeper
//!
//! This module provides the error type for the node management subsystem and
//! the user-facing error presentation used by the CLI. The error system follows
//! two principles:
//! 1. **Strongly-typed errors** so callers can react to a specific failure mode
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Network**: [`NodeError::NetworkError`], [`NodeError::ReleaseAssetNotFound`],
//!   [`NodeError::DownloadError`]
//! - **File System**: [`NodeError::SwapError`], [`NodeError::FileSystemError`]
//! - **Process**: [`NodeError::ProcessSpawnError`], [`NodeError::ProcessControlError`]
//! - **Configuration**: [`NodeError::ConfigError`], [`NodeError::TomlError`]
//!
//! A version that cannot be determined is not an error: the probes report it as
//! `None` ("unavailable").
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodekeeper_cli::core::{NodeError, user_friendly_error};
//!
//! let error = NodeError::ProcessSpawnError {
//!     path: "/opt/node/idena-node".to_string(),
//!     reason: "binary not found".to_string(),
//! };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for node management operations.
///
/// Each variant names one failure mode of the subsystem and carries enough
/// context (paths, URLs, pids) to produce a useful message.
///
/// # Propagation
///
/// Errors raised inside the recurring update cycle are caught at the cycle
/// boundary and logged; they never reach the caller. Errors from direct
/// operations (`start`, `stop`, `download`, `replace`) are returned to the
/// caller as-is.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The release API or a download host could not be reached, answered with
    /// a non-success status, or returned an unreadable body.
    #[error("Network error during {operation}: {reason}")]
    NetworkError {
        /// The operation that failed (e.g., "release lookup")
        operation: String,
        /// Underlying reason
        reason: String,
    },

    /// The latest release has no asset for the current platform.
    #[error("No release asset starting with '{prefix}' in release {version}")]
    ReleaseAssetNotFound {
        /// Asset name prefix that was searched for
        prefix: String,
        /// Release version that was inspected
        version: String,
    },

    /// A binary download failed. The partial file has been removed.
    #[error("Failed to download {url}: {reason}")]
    DownloadError {
        /// URL being downloaded
        url: String,
        /// Underlying reason
        reason: String,
    },

    /// The active binary could not be replaced by the staged one.
    #[error("Failed to replace {path} after {attempts} attempt(s): {reason}")]
    SwapError {
        /// Active binary path
        path: String,
        /// Number of deletion attempts made
        attempts: u32,
        /// Underlying reason
        reason: String,
    },

    /// A filesystem operation outside of the swap failed.
    #[error("File system error during {operation} on {path}: {reason}")]
    FileSystemError {
        /// The operation that failed (e.g., "create data directory")
        operation: String,
        /// Path involved
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// The node binary is absent or could not be executed.
    #[error("Failed to start node binary {path}: {reason}")]
    ProcessSpawnError {
        /// Binary path
        path: String,
        /// Underlying reason
        reason: String,
    },

    /// Signalling or killing a running node failed.
    #[error("Failed to control node process {pid}: {reason}")]
    ProcessControlError {
        /// Process id
        pid: u32,
        /// Underlying reason
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration error
        message: String,
    },

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl NodeError {
    /// Shorthand for a [`NodeError::NetworkError`].
    pub fn network(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::NetworkError {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Error context wrapper that provides user-friendly error information
///
/// `ErrorContext` wraps a displayable error and adds optional details and a
/// suggestion for resolution. This is how the CLI presents errors.
///
/// When displayed, errors show:
/// 1. **Error**: The main error message in red
/// 2. **Details**: Additional context about the error in yellow (optional)
/// 3. **Suggestion**: Actionable steps to resolve the issue in green (optional)
#[derive(Debug)]
pub struct ErrorContext {
    /// The main error message
    pub error: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context from any displayable error.
    #[must_use]
    pub fn new(error: impl fmt::Display) -> Self {
        Self {
            error: error.to_string(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details about the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
///
/// Looks through the `anyhow` chain for a [`NodeError`] or [`std::io::Error`]
/// and attaches guidance specific to that failure. Anything else is passed
/// through with its full context chain as details.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(node_error) = error.chain().find_map(|e| e.downcast_ref::<NodeError>()) {
        return context_for(node_error, &error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(&error)
                    .with_suggestion("Check ownership of the node directory or run with sufficient permissions")
                    .with_details("nodekeeper does not have permission to read or write a file it needs");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(&error)
                    .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    let mut ctx = ErrorContext::new(&error);
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    if !chain.is_empty() {
        ctx = ctx.with_details(chain.join(": "));
    }
    ctx
}

fn context_for(node_error: &NodeError, error: &anyhow::Error) -> ErrorContext {
    let ctx = ErrorContext::new(error);
    match node_error {
        NodeError::NetworkError { .. } => ctx
            .with_suggestion("Check your internet connection; the release API may also be rate limiting requests")
            .with_details(node_error.to_string()),
        NodeError::ReleaseAssetNotFound { prefix, .. } => ctx
            .with_suggestion(format!(
                "No published binary matches '{prefix}'. Set `release.asset_prefix` in the config if your platform uses another name"
            )),
        NodeError::DownloadError { .. } => ctx
            .with_suggestion("Retry later; partial downloads are removed so the next attempt starts clean"),
        NodeError::SwapError { path, .. } => ctx
            .with_suggestion(format!(
                "Another process may hold {path} open. Stop the node and run `nodekeeper update` again"
            )),
        NodeError::ProcessSpawnError { .. } => ctx
            .with_suggestion("Run `nodekeeper update` to download the node binary, or check it is executable"),
        NodeError::ProcessControlError { .. } => ctx
            .with_suggestion("The process may have exited already; check `nodekeeper status`"),
        NodeError::ConfigError { .. } | NodeError::TomlError(_) => ctx
            .with_details(node_error.to_string())
            .with_suggestion("Check the TOML syntax of your config file (`nodekeeper config path` shows where it is)"),
        NodeError::FileSystemError { .. } => ctx,
    }
}
