//! Exclusive port acquisition and graceful shutdown for network services.
//!
//! A service that must own a fixed TCP port across restarts asks an
//! [`AcquisitionController`] for it. The controller probes the port, kills
//! stale holders, and binds with bounded retries. The resulting
//! [`ServerHandle`] goes to the application, while a [`ShutdownCoordinator`]
//! drains it on SIGTERM/SIGINT and exits immediately on fatal errors.

#[cfg(not(unix))]
compile_error!("port-warden requires a Unix platform (Linux or macOS)");

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::WardenConfig;
pub use lifecycle::{launch, AcquisitionController, ShutdownCoordinator};
pub use net::ServerHandle;
