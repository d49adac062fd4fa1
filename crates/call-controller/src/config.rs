//! Call controller configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; nothing here is sensitive, so `Debug` derives plainly.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address (REST surface + push gateway + probes).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default budget for a correlated media-subsystem request.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 20;

/// Default interval for sweeping abandoned pending-request entries.
pub const DEFAULT_PENDING_SWEEP_INTERVAL_SECONDS: u64 = 5;

/// Call controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Budget for a correlated media-subsystem request (default: 20s).
    pub request_timeout_seconds: u64,

    /// Interval for sweeping abandoned pending-request entries (default: 5s).
    pub pending_sweep_interval_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("GROUPHONE_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let request_timeout_seconds = parse_seconds(
            vars,
            "GROUPHONE_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;

        let pending_sweep_interval_seconds = parse_seconds(
            vars,
            "GROUPHONE_PENDING_SWEEP_INTERVAL_SECONDS",
            DEFAULT_PENDING_SWEEP_INTERVAL_SECONDS,
        )?;

        Ok(Self {
            bind_address,
            request_timeout_seconds,
            pending_sweep_interval_seconds,
        })
    }

    /// Request budget as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn pending_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pending_sweep_interval_seconds)
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => {
            let value: u64 = raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{key} must be an integer")))?;
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{key} must be non-zero")));
            }
            Ok(value)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(
            config.request_timeout_seconds,
            DEFAULT_REQUEST_TIMEOUT_SECONDS
        );
        assert_eq!(config.request_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_overrides() {
        let mut vars = HashMap::new();
        vars.insert(
            "GROUPHONE_BIND_ADDRESS".to_string(),
            "127.0.0.1:9999".to_string(),
        );
        vars.insert(
            "GROUPHONE_REQUEST_TIMEOUT_SECONDS".to_string(),
            "3".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9999");
        assert_eq!(config.request_timeout_seconds, 3);
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let mut vars = HashMap::new();
        vars.insert(
            "GROUPHONE_REQUEST_TIMEOUT_SECONDS".to_string(),
            "soon".to_string(),
        );
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        let mut vars = HashMap::new();
        vars.insert(
            "GROUPHONE_PENDING_SWEEP_INTERVAL_SECONDS".to_string(),
            "0".to_string(),
        );
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
