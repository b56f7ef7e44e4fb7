//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Bind attempt fails:
//!     → retries.rs (retryable? attempts left? how long to wait?)
//!     → acquisition loop sleeps, then probes again
//! ```

pub mod retries;

pub use retries::RetryPolicy;
