//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::WardenConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Conventional variable for the service port.
pub const PORT_ENV: &str = "PORT";
/// Override for the shutdown grace period in milliseconds.
pub const GRACE_ENV: &str = "PORT_WARDEN_GRACE_MS";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {name}: `{value}`")]
    Env { name: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file, apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<WardenConfig, ConfigError> {
    finalize(read_config(path)?)
}

/// Parse a TOML file without overrides or validation.
pub fn read_config(path: &Path) -> Result<WardenConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Apply environment overrides to `config` and validate the result.
pub fn finalize(config: WardenConfig) -> Result<WardenConfig, ConfigError> {
    let config = apply_overrides(config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply overrides from `lookup`, which maps a variable name to its value.
pub fn apply_overrides<F>(mut config: WardenConfig, lookup: F) -> Result<WardenConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(PORT_ENV) {
        config.listener.port = value.trim().parse().map_err(|_| ConfigError::Env {
            name: PORT_ENV,
            value: value.clone(),
        })?;
    }

    if let Some(value) = lookup(GRACE_ENV) {
        config.shutdown.grace_period_ms = value.trim().parse().map_err(|_| ConfigError::Env {
            name: GRACE_ENV,
            value: value.clone(),
        })?;
    }

    Ok(config)
}
