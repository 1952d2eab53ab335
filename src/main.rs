//! nodekeeper command-line entry point
//!
//! Parses the command line, runs the selected command and turns errors into
//! coloured messages with suggestions before exiting with status 1.

use anyhow::Result;
use clap::Parser;
use nodekeeper_cli::cli;
use nodekeeper_cli::core::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
