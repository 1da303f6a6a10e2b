//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to downstream service:
//!     → registry.rs (breaker for the service, created on first use)
//!     → circuit_breaker.rs (admit, or fail fast with fallback / 503)
//!     → protected call, raced against the breaker timeout
//!         → retries.rs + backoff.rs (idempotent retries inside the call)
//!     → circuit_breaker.rs (record exactly one outcome, maybe transition)
//! ```
//!
//! # Design Decisions
//! - One breaker per logical service, never per instance or per route
//! - Denials are self-protection, not dependency failures
//! - The breaker never retries; retry policy belongs to the caller
//! - Fallbacks are explicit values or providers, resolved at the call site

pub mod backoff;
pub mod circuit_breaker;
pub mod fallback;
pub mod registry;
pub mod retries;

pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitState, LifetimeStats, Outcome,
    Rejection, StateListener,
};
pub use fallback::Fallback;
pub use registry::BreakerRegistry;
