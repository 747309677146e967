use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::{Config, ConnectionMode};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Backend URL cannot be empty")]
    EmptyBackendUrl,

    #[error("Invalid {mode} pool: max_size must be at least 1")]
    ZeroPoolSize { mode: ConnectionMode },

    #[error("Invalid {mode} pool: min_size ({min}) exceeds max_size ({max})")]
    PoolMinAboveMax {
        mode: ConnectionMode,
        min: usize,
        max: usize,
    },

    #[error("Invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid circuit breaker threshold: {0}")]
    InvalidCircuitThreshold(String),

    #[error(
        "Invalid response thresholds: warning_response_ms ({0}) must be less than critical_response_ms ({1})"
    )]
    InvalidResponseThresholds(u64, u64),

    #[error("Invalid error_rate_threshold: {0}. Must be between 0 and 1")]
    InvalidErrorRate(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. dbweave.yaml
    /// 3. dbweave.local.yaml (optional local overrides)
    /// 4. Environment variables (DBWEAVE_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("dbweave.yaml"))
            .merge(Yaml::file("dbweave.local.yaml"))
            .merge(Env::prefixed("DBWEAVE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, with environment overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("DBWEAVE_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.backend.url.trim().is_empty() {
            return Err(ConfigError::EmptyBackendUrl);
        }

        for mode in ConnectionMode::ALL {
            let pool = config.pool.for_mode(mode);
            if pool.max_size == 0 {
                return Err(ConfigError::ZeroPoolSize { mode });
            }
            if pool.min_size > pool.max_size {
                return Err(ConfigError::PoolMinAboveMax {
                    mode,
                    min: pool.min_size,
                    max: pool.max_size,
                });
            }
        }
        if config.pool.acquire_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool.acquire_timeout_ms must be positive".to_string(),
            ));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }
        if config.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "retry.multiplier must be at least 1.0, got {}",
                config.retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&config.retry.randomization_factor) {
            return Err(ConfigError::ValidationFailed(format!(
                "retry.randomization_factor must be between 0 and 1, got {}",
                config.retry.randomization_factor
            )));
        }

        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidCircuitThreshold(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if config.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidCircuitThreshold(
                "success_threshold must be at least 1".to_string(),
            ));
        }
        if config.circuit_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "circuit_name cannot be empty".to_string(),
            ));
        }
        if config.query_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "query_timeout_ms must be positive".to_string(),
            ));
        }

        let monitor = &config.monitor;
        if monitor.warning_response_ms >= monitor.critical_response_ms {
            return Err(ConfigError::InvalidResponseThresholds(
                monitor.warning_response_ms,
                monitor.critical_response_ms,
            ));
        }
        if !(0.0..=1.0).contains(&monitor.error_rate_threshold) {
            return Err(ConfigError::InvalidErrorRate(monitor.error_rate_threshold));
        }
        if monitor.health_check_interval_secs == 0 || monitor.security_check_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "monitor intervals must be positive".to_string(),
            ));
        }
        if monitor.history_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "monitor.history_capacity must be at least 1".to_string(),
            ));
        }
        if monitor.alert_callback_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "monitor.alert_callback_timeout_ms must be positive".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        Ok(())
    }
}
