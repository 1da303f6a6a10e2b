//! Operator endpoints for inspecting and steering circuit breakers.
//!
//! ```text
//! GET  /circuit-breaker/status
//! POST /circuit-breaker/reset
//! POST /circuit-breaker/{service}/reset
//! POST /circuit-breaker/{service}/open
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::config::AdminConfig;
use crate::resilience::BreakerRegistry;

pub fn setup_admin_router(registry: Arc<BreakerRegistry>, config: &AdminConfig) -> Router {
    let router = Router::new()
        .route("/circuit-breaker/status", get(get_status))
        .route("/circuit-breaker/reset", post(reset_all))
        .route("/circuit-breaker/{service}/reset", post(reset_service))
        .route("/circuit-breaker/{service}/open", post(force_open_service));

    let router = if config.api_key.is_empty() {
        router
    } else {
        let key: Arc<str> = Arc::from(config.api_key.as_str());
        router.route_layer(middleware::from_fn_with_state(key, admin_auth_middleware))
    };

    router.with_state(registry)
}
