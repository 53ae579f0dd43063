//! Tracing subscriber setup for binaries and embedders.

use tracing_subscriber::EnvFilter;

use crate::RelayError;

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` wins when it is set; otherwise `default_filter` is used
/// (e.g. `"info"` or `"chatrelay=debug,info"`).
///
/// # Errors
/// [`RelayError::Logging`] if the filter doesn't parse or a global
/// subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> Result<(), RelayError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| RelayError::Logging(e.to_string()))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| RelayError::Logging(e.to_string()))
}
