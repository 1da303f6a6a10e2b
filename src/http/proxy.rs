//! Forwarding to downstream services.
//!
//! # Responsibilities
//! - Rewrite the inbound URI onto the service's address
//! - Retry idempotent requests within the retry budget; bodies without a
//!   known size under 1 MiB are streamed once instead
//! - Map transport failures to 502 responses
//!
//! # Design Decisions
//! - `Forwarder` is a trait object so the router can be driven by an
//!   in-process stub in tests
//! - Retries happen below the circuit breaker: the breaker sees one outcome
//!   per inbound request, however many attempts it took
//! - The path is forwarded unchanged; services own their `/api/...` prefix

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        header,
        request::Parts,
        uri::{Authority, Scheme},
        Request, StatusCode, Uri,
    },
    response::Response,
};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::{RetryConfig, ServiceConfig};
use crate::http::request::request_id;
use crate::http::response::{bad_gateway_response, error_response};
use crate::observability::metrics;
use crate::resilience::backoff::backoff_delay;
use crate::resilience::retries::{is_retryable, RetryBudget};

/// Largest body buffered so a request can be replayed.
const MAX_REPLAY_BODY: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid service address '{0}'")]
    InvalidAddress(String),

    #[error("invalid upstream uri: {0}")]
    InvalidUri(#[from] axum::http::uri::InvalidUriParts),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

pub type ForwardFuture = BoxFuture<'static, Result<Response, ForwardError>>;

/// Sends one request to one downstream service.
pub trait Forwarder: Send + Sync + 'static {
    fn forward(&self, service: &ServiceConfig, request: Request<Body>) -> ForwardFuture;
}

/// Plain HTTP/1.1 forwarding over a pooled hyper client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
}

impl HttpForwarder {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }
}

impl Default for HttpForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl Forwarder for HttpForwarder {
    fn forward(&self, service: &ServiceConfig, mut request: Request<Body>) -> ForwardFuture {
        let client = self.client.clone();
        let address = service.address.clone();

        Box::pin(async move {
            let authority = Authority::from_str(&address)
                .map_err(|_| ForwardError::InvalidAddress(address.clone()))?;
            let mut parts = request.uri().clone().into_parts();
            parts.scheme = Some(Scheme::HTTP);
            parts.authority = Some(authority);
            *request.uri_mut() = Uri::from_parts(parts)?;
            // Let the client derive Host from the rewritten URI.
            request.headers_mut().remove(header::HOST);

            let response = client.request(request).await?;
            let (parts, body) = response.into_parts();
            Ok(Response::from_parts(parts, Body::new(body)))
        })
    }
}

/// State for one service's proxy routes.
#[derive(Clone)]
pub struct ProxyState {
    pub service: Arc<ServiceConfig>,
    pub forwarder: Arc<dyn Forwarder>,
    pub retries: RetryConfig,
    pub budget: Arc<RetryBudget>,
}

/// Only bodies with a known size under the cap are buffered for replay.
fn fits_replay_buffer(body: &Body) -> bool {
    HttpBody::size_hint(body)
        .upper()
        .is_some_and(|len| len <= MAX_REPLAY_BODY as u64)
}

fn rebuild(parts: &Parts, body: Body) -> Request<Body> {
    let mut request = Request::new(body);
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    request
}

/// Catch-all handler behind a service's path prefix.
pub async fn proxy_handler(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let service = state.service.name.as_str();
    let request_id = request_id(request.headers());

    tracing::debug!(
        request_id = %request_id,
        service = %service,
        method = %request.method(),
        path = %request.uri().path(),
        "Proxying request"
    );

    state.budget.record_request();
    let max_attempts = if state.retries.enabled && request.method().is_idempotent() {
        if fits_replay_buffer(request.body()) {
            state.retries.max_attempts.max(1)
        } else {
            tracing::debug!(request_id = %request_id, "Body too large or unsized, forwarding without retries");
            1
        }
    } else {
        1
    };

    let result = if max_attempts == 1 {
        state.forwarder.forward(&state.service, request).await
    } else {
        let (parts, body) = request.into_parts();
        match axum::body::to_bytes(body, MAX_REPLAY_BODY).await {
            Ok(bytes) => {
                let mut attempt = 1;
                loop {
                    let result = state
                        .forwarder
                        .forward(&state.service, rebuild(&parts, Body::from(bytes.clone())))
                        .await;
                    let retryable = match &result {
                        Ok(response) => is_retryable(&parts.method, Some(response.status()), false),
                        Err(_) => is_retryable(&parts.method, None, true),
                    };
                    if attempt >= max_attempts || !retryable || !state.budget.can_retry() {
                        break result;
                    }

                    let delay = backoff_delay(attempt, &state.retries);
                    tracing::info!(
                        request_id = %request_id,
                        service = %service,
                        attempt,
                        delay = ?delay,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Failed to read request body");
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "BAD_REQUEST",
                    "Request body could not be read",
                    Some(&request_id),
                );
            }
        }
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(request_id = %request_id, service = %service, error = %e, "Upstream error");
            bad_gateway_response(service, &request_id)
        }
    };
    metrics::record_request(service, response.status().as_u16(), start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_buffer_needs_known_small_body() {
        assert!(fits_replay_buffer(&Body::empty()));
        assert!(fits_replay_buffer(&Body::from(vec![0u8; MAX_REPLAY_BODY])));
        assert!(!fits_replay_buffer(&Body::from(vec![0u8; MAX_REPLAY_BODY + 1])));

        let chunks = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(vec![1u8; 8])]);
        assert!(!fits_replay_buffer(&Body::from_stream(chunks)));
    }
}
