//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for the graceful-stop signals (SIGTERM, SIGINT)
//! - Translate signals to `ShutdownTrigger`s
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Every delivery is surfaced; deduplication is the shutdown sequence's job

use tokio::signal::unix::{signal, Signal, SignalKind};

/// Why a graceful shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGTERM.
    Terminate,
    /// SIGINT.
    Interrupt,
    /// Requested from code (e.g. the application returned).
    Programmatic,
}

impl std::fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ShutdownTrigger::Terminate => "SIGTERM",
            ShutdownTrigger::Interrupt => "SIGINT",
            ShutdownTrigger::Programmatic => "programmatic",
        };
        f.write_str(name)
    }
}

/// Stream of graceful-stop signals.
#[derive(Debug)]
pub struct SignalListener {
    sigterm: Signal,
    sigint: Signal,
}

impl SignalListener {
    /// Register the handlers. Must be called inside a Tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next signal. `None` once both streams are closed.
    pub async fn recv(&mut self) -> Option<ShutdownTrigger> {
        tokio::select! {
            Some(()) = self.sigterm.recv() => Some(ShutdownTrigger::Terminate),
            Some(()) = self.sigint.recv() => Some(ShutdownTrigger::Interrupt),
            else => None,
        }
    }
}
