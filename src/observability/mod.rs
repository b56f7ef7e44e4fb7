//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Acquisition and shutdown steps produce:
//!     → logging.rs (structured log events: attempt, stage, reason, pid, ...)
//!
//! Consumers:
//!     → stdout (pretty for humans, JSON for log aggregation)
//! ```

pub mod logging;

pub use logging::init_logging;
