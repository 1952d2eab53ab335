//! nodekeeper - keep an embedded blockchain node installed, running and current
//!
//! nodekeeper manages an external, independently versioned node binary on
//! behalf of an application. It locates releases, downloads the binary,
//! probes versions, launches and supervises the process, stops it gracefully
//! and replaces the binary when a new release is published.
//!
//! # Architecture Overview
//!
//! The library is split into focused modules:
//!
//! - [`node`] - the node management subsystem: release lookup, version
//!   probing, downloads, the atomic binary swap, process supervision and the
//!   update orchestrator
//! - [`config`] - the user-wide TOML configuration
//! - [`core`] - the [`NodeError`](core::NodeError) type and user-facing error
//!   presentation
//! - [`cli`] - the `nodekeeper` command-line interface
//! - [`utils`] - platform helpers and progress bars
//! - [`constants`] - timeouts, retry counts, ports and other fixed values
//!
//! # Filesystem Layout
//!
//! ```text
//! <node_dir>/
//! ├── idena-node[.exe]          active binary, replaced only by a swap
//! ├── new-idena-node[.exe]      staging binary, the download destination
//! ├── config.json               optional override passed as --config
//! └── datadir/
//!     └── logs/
//!         ├── output.log        node stdout
//!         └── error.log         node stderr in timestamped blocks
//! ```
//!
//! # Update Flow
//!
//! 1. The orchestrator asks the release API for the latest version
//! 2. A newer version is announced with an `UpdateAvailable` event
//! 3. When managing the embedded binary, the staged binary is probed and
//!    reused if it already has that version, otherwise it is downloaded
//! 4. The active binary is replaced by the staged one
//! 5. `UpdateDownloaded` is published; restarting the node is up to the caller
//!
//! Only one download runs at a time. Failures inside a cycle are logged and the
//! next cycle runs on schedule.
//!
//! # Example
//!
//! ```rust,no_run
//! use nodekeeper_cli::config::GlobalConfig;
//! use nodekeeper_cli::node::{LogLine, ProcessSupervisor};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GlobalConfig::load().await?;
//! let supervisor = ProcessSupervisor::new();
//!
//! let handle = supervisor
//!     .start(&config.launch_config()?, |line: LogLine| println!("{}", line.line))
//!     .await?;
//!
//! // ... later
//! let message = supervisor.stop(&handle).await?;
//! println!("{message}");
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! All modules log through `tracing`. Routine steps are `debug`, lifecycle
//! transitions `info`, swallowed failures `warn` and failed updates `error`.
//! The CLI installs a subscriber honouring `RUST_LOG`.

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod node;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
