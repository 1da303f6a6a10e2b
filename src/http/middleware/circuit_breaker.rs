//! Circuit breaker protection for a proxied service route.
//!
//! # Responsibilities
//! - Fail fast with 503 `CIRCUIT_OPEN` while the service's breaker refuses calls
//! - Bound the downstream call by the breaker timeout (504 on expiry)
//! - Report exactly one outcome per admitted request
//!
//! # Design Decisions
//! - The outcome is classified from the response head: any 5xx is a failure,
//!   everything else a success. Streaming the body is not observed.
//! - A client that disconnects mid-call drops the permit, which records a
//!   cancellation instead of a failure

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::request::request_id;
use crate::http::response::{circuit_open_response, gateway_timeout_response};
use crate::resilience::BreakerRegistry;

/// Which breaker guards the route.
#[derive(Clone)]
pub struct ProtectionState {
    pub registry: Arc<BreakerRegistry>,
    pub service: Arc<str>,
}

impl ProtectionState {
    pub fn new(registry: Arc<BreakerRegistry>, service: &str) -> Self {
        Self {
            registry,
            service: Arc::from(service),
        }
    }
}

pub async fn circuit_breaker_middleware(
    State(state): State<ProtectionState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let breaker = state.registry.get_default(&state.service);
    let request_id = request_id(request.headers());

    let permit = match breaker.try_acquire() {
        Ok(permit) => permit,
        Err(rejection) => {
            // A saturated HALF_OPEN breaker has no remaining wait; ask for a second.
            let retry_after = rejection.retry_after_secs().max(1);
            tracing::warn!(
                request_id = %request_id,
                service = %state.service,
                state = %rejection.state,
                retry_after,
                "Circuit open, failing fast"
            );
            return circuit_open_response(&state.service, retry_after, &request_id);
        }
    };

    match tokio::time::timeout(breaker.timeout(), next.run(request)).await {
        Ok(response) => {
            if response.status().is_server_error() {
                tracing::debug!(
                    request_id = %request_id,
                    service = %state.service,
                    status = %response.status(),
                    "Downstream failure recorded"
                );
                permit.fail();
            } else {
                permit.succeed();
            }
            response
        }
        Err(_) => {
            permit.time_out();
            tracing::warn!(
                request_id = %request_id,
                service = %state.service,
                timeout_ms = breaker.settings().timeout_ms,
                "Downstream call timed out"
            );
            gateway_timeout_response(&state.service, breaker.timeout(), &request_id)
        }
    }
}
