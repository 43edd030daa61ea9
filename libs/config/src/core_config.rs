//! Core Configuration Module
//!
//! Loads pool and session settings from an optional TOML file with
//! `COAP_`-prefixed environment overrides, e.g. `COAP_POOL__CAPACITY=512`.

use crate::defaults;
use anyhow::{ensure, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Top-level configuration for the transport core
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    pub pool: PoolSettings,
    pub session: SessionSettings,
}

/// Message pool sizing
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of idle messages kept for reuse
    pub capacity: usize,
    pub buffer_baseline: usize,
    pub buffer_shrink_threshold: usize,
}

/// Per-session settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// Size of the read buffer handed to the connection
    pub max_message_size: usize,
    /// Whether the session owns and closes its connection
    pub close_socket: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: defaults::pool::CAPACITY,
            buffer_baseline: defaults::pool::BUFFER_BASELINE,
            buffer_shrink_threshold: defaults::pool::BUFFER_SHRINK_THRESHOLD,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_message_size: defaults::session::MAX_MESSAGE_SIZE,
            close_socket: defaults::session::CLOSE_SOCKET,
        }
    }
}

impl CoreConfig {
    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading CoAP config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (COAP_ prefix, `__` between levels)
        builder = builder.add_source(
            Environment::with_prefix("COAP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let core: CoreConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        debug!(?core, "configuration loaded");
        Ok(core)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Reject settings the pool and session cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(self.pool.capacity > 0, "pool.capacity must be greater than zero");
        ensure!(
            self.pool.buffer_baseline > 0,
            "pool.buffer_baseline must be greater than zero"
        );
        ensure!(
            self.pool.buffer_shrink_threshold >= self.pool.buffer_baseline,
            "pool.buffer_shrink_threshold ({}) must not be below pool.buffer_baseline ({})",
            self.pool.buffer_shrink_threshold,
            self.pool.buffer_baseline
        );
        ensure!(
            self.session.max_message_size > 0,
            "session.max_message_size must be greater than zero"
        );
        Ok(())
    }
}

/// Convenience function to load and validate configuration
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    let config = CoreConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("coap.toml");

        let config_content = r#"
[pool]
capacity = 128

[session]
close_socket = false
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = load_config(Some(&config_path)).unwrap();

        assert_eq!(config.pool.capacity, 128);
        assert_eq!(config.pool.buffer_baseline, defaults::pool::BUFFER_BASELINE);
        assert!(!config.session.close_socket);
        assert_eq!(config.session.max_message_size, defaults::session::MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(CoreConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = CoreConfig::default();
        assert!(config.validate().is_ok());

        config.pool.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.session.max_message_size = 0;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.pool.buffer_shrink_threshold = 16;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("buffer_shrink_threshold"));
    }

    #[test]
    fn test_from_toml() {
        let config = CoreConfig::from_toml("[session]\nmax_message_size = 1152\n").unwrap();
        assert_eq!(config.session.max_message_size, 1152);
        assert_eq!(config.pool, PoolSettings::default());

        let round_trip = toml::to_string(&config).unwrap();
        assert_eq!(CoreConfig::from_toml(&round_trip).unwrap(), config);
    }
}
