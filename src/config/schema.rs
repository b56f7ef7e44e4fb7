//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the warden.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Root configuration for the port warden.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    /// Listener configuration (bind host, target port, limits).
    pub listener: ListenerConfig,

    /// Port acquisition settings (retries, delays, timeouts).
    pub acquisition: AcquisitionConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host to bind (IP literal, e.g. "0.0.0.0").
    pub bind_host: String,

    /// Fixed TCP port the service must own.
    pub port: u16,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Listen backlog passed to `listen(2)`.
    pub backlog: i32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 4011,
            max_connections: 10_000,
            backlog: 1024,
        }
    }
}

impl ListenerConfig {
    /// Resolve the socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        let ip: IpAddr = self.bind_host.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Port acquisition configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Maximum number of probe/reap/bind attempts.
    pub max_retries: u32,

    /// Fixed delay between failed attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Wait after terminating occupants before binding, in milliseconds.
    pub settle_delay_ms: u64,

    /// Upper bound on socket creation + bind + listen, in milliseconds.
    pub startup_timeout_ms: u64,

    /// Upper bound on the OS occupancy query, in milliseconds.
    pub probe_timeout_ms: u64,

    /// Terminate processes found holding the port.
    pub reap_occupants: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 2000,
            settle_delay_ms: 1000,
            startup_timeout_ms: 10_000,
            probe_timeout_ms: 5000,
            reap_occupants: true,
        }
    }
}

impl AcquisitionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight connections may take to finish, in milliseconds.
    pub grace_period_ms: u64,

    /// Route panics through the fatal-exit path.
    pub catch_panics: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5000,
            catch_panics: true,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON output.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = WardenConfig::default();
        assert_eq!(config.listener.port, 4011);
        assert_eq!(config.acquisition.max_retries, 5);
        assert_eq!(config.acquisition.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.acquisition.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.acquisition.startup_timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown.grace_period(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: WardenConfig = toml::from_str(
            r#"
            [listener]
            port = 8080

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.listener.bind_host, "0.0.0.0");
        assert_eq!(config.acquisition.max_retries, 5);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn socket_addr_rejects_hostnames() {
        let mut listener = ListenerConfig::default();
        listener.bind_host = "localhost".into();
        assert!(listener.socket_addr().is_err());

        listener.bind_host = "127.0.0.1".into();
        assert_eq!(listener.socket_addr().unwrap().to_string(), "127.0.0.1:4011");
    }
}
