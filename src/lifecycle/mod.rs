//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Acquire port (acquisition.rs) → Install handlers → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit 0
//!     Fatal error / panic → Exit 1 (no drain)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Acquisition attempts are strictly sequential
//! - Shutdown runs at most once, guarded by a one-way flag
//! - Shutdown has timeout: forced exit after the grace period

pub mod acquisition;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use acquisition::{
    AcquisitionController, AcquisitionError, AcquisitionState, Attempt, AttemptOutcome,
    Capabilities, Clock, TokioClock,
};
pub use shutdown::{
    ProcessExit, ShutdownCoordinator, ShutdownHandle, ShutdownHook, ShutdownOutcome,
    ShutdownState, Terminator,
};
pub use signals::{ShutdownTrigger, SignalListener};
pub use startup::{launch, launch_with, StartupError};
