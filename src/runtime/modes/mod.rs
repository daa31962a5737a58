//! Mode routing
//!
//! - Server mode (HTTP server + webhook worker)
//! - CLI mode (one-shot administrative commands)

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "server")]
pub use server::run_server;

#[cfg(feature = "cli")]
pub use cli::run_cli;

use crate::cli::Commands;

/// Mode detection result
#[derive(Debug, PartialEq)]
pub enum Mode {
    #[cfg(feature = "server")]
    Server,
    #[cfg(feature = "cli")]
    Cli,
    Unknown,
}

/// Detect which mode to run based on the parsed subcommand
///
/// No subcommand or `serve` runs the server; anything else is a CLI command.
pub fn detect_mode(command: Option<&Commands>) -> Mode {
    match command {
        #[cfg(feature = "server")]
        None | Some(Commands::Serve) => Mode::Server,
        #[cfg(feature = "cli")]
        Some(_) => Mode::Cli,
        #[allow(unreachable_patterns)]
        _ => Mode::Unknown,
    }
}
