//! JSON error responses produced by the gateway itself.
//!
//! Every body carries `status: "error"`, a human message, a machine-readable
//! `error` code and the request ID.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

pub fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    request_id: Option<&str>,
) -> Response {
    let body = ErrorBody {
        status: "error",
        message: message.into(),
        error: code,
        retry_after: None,
        request_id: request_id.map(str::to_string),
    };
    (status, Json(body)).into_response()
}

/// Fast-fail answer while a breaker refuses calls.
pub fn circuit_open_response(service: &str, retry_after_secs: u64, request_id: &str) -> Response {
    let body = ErrorBody {
        status: "error",
        message: format!("Servicio {service} temporarily unavailable"),
        error: "CIRCUIT_OPEN",
        retry_after: Some(retry_after_secs),
        request_id: Some(request_id.to_string()),
    };
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

/// The downstream call lost the race against the breaker timeout.
pub fn gateway_timeout_response(service: &str, after: Duration, request_id: &str) -> Response {
    error_response(
        StatusCode::GATEWAY_TIMEOUT,
        "GATEWAY_TIMEOUT",
        format!("Servicio {service} did not respond within {}ms", after.as_millis()),
        Some(request_id),
    )
}

/// Transport-level failure reaching the downstream service.
pub fn bad_gateway_response(service: &str, request_id: &str) -> Response {
    error_response(
        StatusCode::BAD_GATEWAY,
        "BAD_GATEWAY",
        format!("Servicio {service} could not be reached"),
        Some(request_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_open_body_and_header() {
        let response = circuit_open_response("cart-service", 12, "req-1");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "error",
                "message": "Servicio cart-service temporarily unavailable",
                "error": "CIRCUIT_OPEN",
                "retryAfter": 12,
                "requestId": "req-1"
            })
        );
    }
}
