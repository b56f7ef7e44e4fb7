//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! ServerHandle::accept (bounded, stops on shutdown)
//!     → server.rs (hyper connection, HTTP/1.1 or HTTP/2)
//!     → Axum Router (request ID, tracing, timeout, handlers)
//!     → Send to client
//! ```

pub mod server;

pub use server::{default_router, serve, with_middleware};
