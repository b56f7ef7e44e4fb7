//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (PORT / PORT_WARDEN_GRACE_MS overrides)
//!     → validation.rs (semantic checks)
//!     → WardenConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AcquisitionConfig, ListenerConfig, LogFormat, ObservabilityConfig, ShutdownConfig,
    WardenConfig,
};
pub use validation::{validate_config, ValidationError};
