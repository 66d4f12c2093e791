//! Structured logging initialisation.
//!
//! Thin wrapper around `tracing-subscriber` driven by [`LoggingConfig`].
//! Initialisation is idempotent: installing a second global subscriber is
//! reported as a configuration error rather than a panic.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Result, SessionError};

/// Install the global tracing subscriber from configuration.
///
/// The `RUST_LOG` environment variable, when set, overrides the configured
/// level so deployments can raise verbosity without editing config files.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| SessionError::Config(format!("invalid log level: '{}'", config.level)))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init()
        .map_err(|e| SessionError::Config(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            with_target: true,
        };
        assert!(matches!(init(&config), Err(SessionError::Config(_))));
    }
}
