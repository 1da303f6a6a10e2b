//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → breaker profiles handed to the BreakerRegistry
//!     → service table handed to the HTTP server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breaker thresholds are static
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BreakerConfig, BreakerOverrides, BreakerSettings, GatewayConfig, ListenerConfig,
    ObservabilityConfig, ProfileKind, RetryConfig, ServiceConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
