//! Configuration management for nodekeeper
//!
//! nodekeeper reads one user-wide TOML file (see [`global`] for its location
//! and format). It describes where the node lives, how it is launched, where
//! releases are looked up and how often updates are checked.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodekeeper_cli::config::GlobalConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let path = GlobalConfig::resolve_path(None)?;
//! let mut config = GlobalConfig::load_with_optional(Some(path.clone())).await?;
//! if config.ensure_api_key() {
//!     config.save_to(&path).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod global;

pub use global::{CONFIG_PATH_ENV, GlobalConfig, NodeSettings, ReleaseSettings, UpdateSettings};
