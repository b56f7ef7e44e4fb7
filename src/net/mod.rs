//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Acquisition attempt:
//!     → probe.rs (who is listening on the port? advisory)
//!     → reaper.rs (SIGKILL the occupants, "no such process" is fine)
//!     → binder.rs (socket → bind → listen, bounded by startup timeout)
//!     → listener.rs (ServerHandle handed to the application)
//!
//! Handle States:
//!     Starting → Listening → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - OS access sits behind small capability traits (`ProcessLister`,
//!   `ProcessKiller`, `Binder`) so tests substitute fakes
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod binder;
pub mod connection;
pub mod listener;
pub mod probe;
pub mod reaper;

pub use binder::{BindError, Binder, TcpBinder};
pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, HandleControl, HandleState, ServerHandle};
pub use probe::{LsofLister, OccupancyReport, PortProbe, ProcessLister};
pub use reaper::{KillOutcome, ProcessKiller, ProcessReaper, ReapSummary, SignalKiller};
