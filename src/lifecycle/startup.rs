//! Startup orchestration.
//!
//! # Responsibilities
//! - Acquire the configured port
//! - Install shutdown handlers around the resulting handle
//! - Hand the handle to the application and supervise it until exit
//!
//! # Design Decisions
//! - Fail fast: any acquisition error is returned to the caller
//! - Handlers are installed before the application sees the handle, so no
//!   signal can arrive unobserved
//! - An application error after listening is fatal (exit 1, no drain)

use std::future::Future;
use thiserror::Error;

use crate::config::WardenConfig;
use crate::lifecycle::acquisition::{AcquisitionController, AcquisitionError};
use crate::lifecycle::shutdown::{ShutdownCoordinator, Terminator};
use crate::lifecycle::signals::ShutdownTrigger;
use crate::net::ServerHandle;

/// Error type for startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid listener address: {0}")]
    Address(#[from] std::net::AddrParseError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error("failed to install shutdown handlers: {0}")]
    Handlers(#[source] std::io::Error),
}

/// Acquire the port, install shutdown handling and run `app` on the handle.
///
/// Returns once the shutdown sequence has completed. With the real process
/// terminator that point is never reached: the sequence exits the process.
pub async fn launch<A, Fut>(config: &WardenConfig, app: A) -> Result<(), StartupError>
where
    A: FnOnce(ServerHandle) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let coordinator = ShutdownCoordinator::from_config(&config.shutdown);
    launch_with(config, coordinator, app).await
}

/// Like [`launch`], but supervised by a caller-supplied coordinator.
pub async fn launch_with<T, A, Fut>(
    config: &WardenConfig,
    mut coordinator: ShutdownCoordinator<T>,
    app: A,
) -> Result<(), StartupError>
where
    T: Terminator,
    A: FnOnce(ServerHandle) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut controller = AcquisitionController::from_config(config)?;
    let handle = controller.start().await?;

    let shutdown = coordinator
        .install(&handle, None)
        .map_err(StartupError::Handlers)?;

    tracing::info!(
        address = %handle.local_addr(),
        attempts = controller.attempts().len(),
        "Serving"
    );

    match app(handle).await {
        Ok(()) if shutdown.is_shutting_down() => {}
        Ok(()) => {
            tracing::info!("Application returned, shutting down");
            shutdown.trigger(ShutdownTrigger::Programmatic).await;
        }
        Err(e) => shutdown.fatal(&e),
    }

    shutdown.finished().await;
    coordinator.uninstall();
    Ok(())
}
