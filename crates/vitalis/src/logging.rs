//! Logging bootstrap for binaries and tools. Library crates only emit
//! `tracing` events; installing a subscriber is the application's call.

use tracing_subscriber::EnvFilter;

use crate::error::SessionError;

/// Install a formatted `tracing` subscriber. `RUST_LOG` wins over `filter`
/// when set. Fails if a global subscriber is already installed.
pub fn init_logging(filter: &str) -> Result<(), SessionError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|_| SessionError::LoggingInitialized)
}
