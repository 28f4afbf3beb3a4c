//! Configuration for the HTTP exchange server.

use std::path::Path;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised loading or validating an [`ExchangeServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field's value was syntactically valid but out of range.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Failure reading or writing the config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure parsing or rendering TOML.
    #[error("TOML error: {0}")]
    Toml(String),
}

/// Upper bound a caller's requested `recv` timeout is clamped to, so a
/// single slow client cannot tie up a server-side connection indefinitely.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 300),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRef, Into)
)]
pub struct RecvTimeoutCeilingSecs(u64);

/// Maximum JSON request body size the server will accept.
#[nutype(
    validate(greater_or_equal = 1024, less_or_equal = 16_777_216),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRef, Into)
)]
pub struct MaxBodyBytes(usize);

/// Runtime configuration for [`super::server::build_router`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeServerConfig {
    /// Address the server binds to, e.g. `"127.0.0.1:8800"`.
    pub bind_address: String,

    /// Ceiling applied to a caller-requested `GET /message` timeout.
    pub recv_timeout_ceiling_secs: RecvTimeoutCeilingSecs,

    /// Maximum accepted request body size.
    pub max_body_bytes: MaxBodyBytes,

    /// Shared secret used by [`super::auth::SharedSecretAuth`]; `None`
    /// disables authentication and every caller shares one principal.
    pub shared_secret: Option<String>,
}

impl ExchangeServerConfig {
    /// Settings tuned for local development: short timeouts, verbose
    /// feedback, no authentication configured by default.
    #[must_use]
    pub fn development() -> Self {
        Self {
            bind_address: "127.0.0.1:8800".to_string(),
            recv_timeout_ceiling_secs: RecvTimeoutCeilingSecs::try_new(30).unwrap(),
            max_body_bytes: MaxBodyBytes::try_new(1_048_576).unwrap(),
            shared_secret: None,
        }
    }

    /// Settings tuned for production: a longer ceiling to tolerate
    /// slower networks, a larger body cap, and no default secret (the
    /// operator must set one).
    #[must_use]
    pub fn production() -> Self {
        Self {
            bind_address: "0.0.0.0:8800".to_string(),
            recv_timeout_ceiling_secs: RecvTimeoutCeilingSecs::try_new(120).unwrap(),
            max_body_bytes: MaxBodyBytes::try_new(4_194_304).unwrap(),
            shared_secret: None,
        }
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Saves configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Toml(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Validates cross-field invariants beyond what the nutype wrappers
    /// already enforce per-field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation {
                field: "bind_address".to_string(),
                reason: format!("{:?} is not a valid socket address", self.bind_address),
            });
        }
        if matches!(&self.shared_secret, Some(s) if s.is_empty()) {
            return Err(ConfigError::Validation {
                field: "shared_secret".to_string(),
                reason: "must not be empty when present".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ExchangeServerConfig {
    fn default() -> Self {
        Self::development()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_and_production_presets_validate() {
        ExchangeServerConfig::development().validate().unwrap();
        ExchangeServerConfig::production().validate().unwrap();
    }

    #[test]
    fn rejects_bad_bind_address() {
        let mut config = ExchangeServerConfig::development();
        config.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchange.toml");
        let config = ExchangeServerConfig::production();
        config.save(&path).unwrap();
        let loaded = ExchangeServerConfig::load(&path).unwrap();
        assert_eq!(loaded.bind_address, config.bind_address);
    }
}
