//! Progress indicators for terminal output
//!
//! Wraps `indicatif` so CLI commands can render node downloads consistently,
//! and hides every indicator when progress output is disabled (`--no-progress`,
//! the `NODEKEEPER_NO_PROGRESS` environment variable, or a non-interactive
//! terminal).
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodekeeper_cli::utils::progress::ProgressBar;
//!
//! let spinner = ProgressBar::new_spinner(false);
//! spinner.set_message("Checking latest node release");
//! // ... lookup
//! spinner.finish_and_clear();
//! ```

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};
use std::io::IsTerminal;
use std::time::Duration;

use crate::node::DownloadProgress;

fn is_progress_disabled(no_progress: bool) -> bool {
    no_progress
        || std::env::var_os("NODEKEEPER_NO_PROGRESS").is_some()
        || !std::io::stderr().is_terminal()
}

/// Progress bar shown while the node binary is downloaded.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// Creates a byte-oriented download bar, hidden when progress is disabled.
    pub fn new_download(no_progress: bool) -> Self {
        let bar = if is_progress_disabled(no_progress) {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new(0);
            bar.set_style(download_style());
            bar
        };
        Self { inner: bar }
    }

    /// Creates a spinner for work of unknown length.
    pub fn new_spinner(no_progress: bool) -> Self {
        let bar = if is_progress_disabled(no_progress) {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { inner: bar }
    }

    /// Applies a progress report from the downloader.
    pub fn update(&self, progress: &DownloadProgress) {
        if let Some(total) = progress.total_bytes {
            self.inner.set_length(total);
        }
        self.inner.set_position(progress.bytes_transferred);
    }

    /// Sets the message displayed next to the bar.
    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    /// Removes the bar from the terminal.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn download_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("{msg:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
        .progress_chars("━╸━")
}

fn spinner_style() -> IndicatifStyle {
    IndicatifStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}
