//! port-warden: run a service on a fixed port, evicting stale holders first.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────── AcquisitionController ────────────────────────┐
//!   │                                                                        │
//!   │   probe (lsof) ──▶ reap (SIGKILL) ──▶ settle ──▶ bind ──▶ Listening    │
//!   │        ▲                                          │                    │
//!   │        └──────── fixed retry delay ◀── retryable ─┘──▶ Failed          │
//!   └────────────────────────────────────────────────────────────────────────┘
//!                                   │ ServerHandle
//!                                   ▼
//!   ┌──────────────┐      ┌──────────────────┐      ┌─────────────────────┐
//!   │ Application  │◀────▶│   ServerHandle   │◀────▶│ ShutdownCoordinator │
//!   │ (axum/hyper) │      │ accept / drain   │      │ SIGTERM, SIGINT,    │
//!   └──────────────┘      └──────────────────┘      │ panics → exit       │
//!                                                   └─────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use port_warden::config::{loader, validate_config, ConfigError, LogFormat, WardenConfig};
use port_warden::http;
use port_warden::observability::init_logging;

#[derive(Parser)]
#[command(name = "port-warden")]
#[command(about = "Serve on a fixed TCP port, reclaiming it from stale processes", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => loader::read_config(path)?,
        None => WardenConfig::default(),
    };

    // Precedence: file < environment < command line.
    let mut config = loader::apply_overrides(config, |name| std::env::var(name).ok())?;
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if cli.json_logs {
        config.observability.log_format = LogFormat::Json;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability)?;

    tracing::info!("port-warden v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_host = %config.listener.bind_host,
        port = config.listener.port,
        max_retries = config.acquisition.max_retries,
        retry_delay_ms = config.acquisition.retry_delay_ms,
        grace_period_ms = config.shutdown.grace_period_ms,
        "Configuration loaded"
    );

    port_warden::launch(&config, |handle| {
        http::serve(handle, http::default_router())
    })
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
