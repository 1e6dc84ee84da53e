//! Logging infrastructure for ssh-restarter
//!
//! Sets up the tracing ecosystem writing to standard error. The daemon
//! deliberately writes no files, so stderr is the only output target.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::{RestarterError, Result};

/// Environment variable controlling the log filter (e.g. "debug",
/// "restarter_server=trace,russh=warn")
pub const LOG_ENV_VAR: &str = "SSH_RESTARTER_LOG";

/// Initialize logging to stderr
///
/// The filter is taken from `SSH_RESTARTER_LOG`, defaulting to "info".
pub fn init_logging() -> Result<()> {
    let filter = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "info".into());
    init_logging_with_filter(&filter)
}

/// Initialize logging to stderr with an explicit filter directive
pub fn init_logging_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| RestarterError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| RestarterError::internal(format!("Failed to init logging: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let result = init_logging_with_filter("not==a==filter");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log filter"));
    }

    // init_logging itself can only be exercised once per process (the global
    // subscriber is install-once), so success paths are covered by running
    // the daemon rather than by unit tests.
}
