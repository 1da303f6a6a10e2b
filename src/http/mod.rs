//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers, per-service routes)
//!     → request.rs (assign and propagate request ID)
//!     → middleware/ (circuit breaker admission, timeout, outcome)
//!     → proxy.rs (retries, forward to the service)
//!     → response.rs (gateway-generated JSON errors)
//!     → Send to client
//! ```

pub mod middleware;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::{ForwardError, ForwardFuture, Forwarder, HttpForwarder};
pub use request::X_REQUEST_ID;
pub use server::GatewayServer;
