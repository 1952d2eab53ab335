//! Cross-platform utilities and helpers
//!
//! # Modules
//!
//! - [`platform`] - Executable naming, release asset tags and path expansion
//! - [`progress`] - Progress bars and spinners for long-running operations

pub mod platform;
pub mod progress;

pub use platform::{asset_prefix, executable_name, get_home_dir, resolve_path};
pub use progress::ProgressBar;
