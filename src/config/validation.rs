//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WardenConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;
use thiserror::Error;

use crate::config::schema::WardenConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.port must be non-zero")]
    ZeroPort,

    #[error("listener.bind_host `{0}` is not an IP address")]
    InvalidBindHost(String),

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("acquisition.max_retries must be at least 1")]
    ZeroRetries,

    #[error("acquisition.startup_timeout_ms must be greater than zero")]
    ZeroStartupTimeout,

    #[error("shutdown.grace_period_ms must be greater than zero")]
    ZeroGracePeriod,

    #[error("observability.log_level `{0}` is not one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &WardenConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if config.listener.bind_host.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidBindHost(
            config.listener.bind_host.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if config.acquisition.max_retries == 0 {
        errors.push(ValidationError::ZeroRetries);
    }
    if config.acquisition.startup_timeout_ms == 0 {
        errors.push(ValidationError::ZeroStartupTimeout);
    }
    if config.shutdown.grace_period_ms == 0 {
        errors.push(ValidationError::ZeroGracePeriod);
    }
    if !LOG_LEVELS.contains(&config.observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
