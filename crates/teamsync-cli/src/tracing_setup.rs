//! Tracing setup for the teamsync CLI
//!
//! Usage:
//!   teamsync --debug ...                      # Debug logging to stderr
//!   RUST_LOG=teamsync_operator=trace teamsync # Fine-grained log control

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Initialize tracing with console output
///
/// `RUST_LOG` wins when set; otherwise `debug` picks the level.
pub fn init_tracing(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}
