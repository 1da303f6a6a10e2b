use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::http::response::error_response;
use crate::resilience::{BreakerRegistry, BreakerSnapshot, CircuitState};

/// Aggregate verdict over every registered breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Recovering,
    Degraded,
    Critical,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

impl Summary {
    pub fn of<'a>(snapshots: impl IntoIterator<Item = &'a BreakerSnapshot>) -> Self {
        let mut summary = Summary::default();
        for snap in snapshots {
            summary.total += 1;
            match snap.state {
                CircuitState::Closed => summary.closed += 1,
                CircuitState::Open => summary.open += 1,
                CircuitState::HalfOpen => summary.half_open += 1,
            }
        }
        summary
    }
}

/// Healthy when nothing is open or probing, recovering when only probing,
/// critical once more than half the breakers are open.
pub fn overall_health(summary: &Summary) -> OverallHealth {
    if summary.open == 0 && summary.half_open == 0 {
        OverallHealth::Healthy
    } else if summary.open == 0 {
        OverallHealth::Recovering
    } else if summary.open * 2 > summary.total {
        OverallHealth::Critical
    } else {
        OverallHealth::Degraded
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub overall_health: OverallHealth,
    pub summary: Summary,
    pub services: BTreeMap<String, BreakerSnapshot>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceActionResponse {
    pub status: &'static str,
    pub message: String,
    pub service: BreakerSnapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetAllResponse {
    pub status: &'static str,
    pub message: String,
    pub services: BTreeMap<String, BreakerSnapshot>,
    pub timestamp: DateTime<Utc>,
}

pub async fn get_status(State(registry): State<Arc<BreakerRegistry>>) -> Json<StatusResponse> {
    let services = registry.snapshot_all();
    let summary = Summary::of(services.values());

    Json(StatusResponse {
        status: "success",
        overall_health: overall_health(&summary),
        summary,
        services,
        timestamp: Utc::now(),
    })
}

fn service_not_found(service: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "SERVICE_NOT_FOUND",
        format!("No circuit breaker registered for {service}"),
        None,
    )
}

pub async fn reset_service(
    State(registry): State<Arc<BreakerRegistry>>,
    Path(service): Path<String>,
) -> Response {
    match registry.reset(&service) {
        Some(snapshot) => Json(ServiceActionResponse {
            status: "success",
            message: format!("Circuit breaker for {service} reset"),
            service: snapshot,
            timestamp: Utc::now(),
        })
        .into_response(),
        None => service_not_found(&service),
    }
}

pub async fn reset_all(State(registry): State<Arc<BreakerRegistry>>) -> Json<ResetAllResponse> {
    let services = registry.reset_all();
    Json(ResetAllResponse {
        status: "success",
        message: format!("{} circuit breakers reset", services.len()),
        services,
        timestamp: Utc::now(),
    })
}

pub async fn force_open_service(
    State(registry): State<Arc<BreakerRegistry>>,
    Path(service): Path<String>,
) -> Response {
    match registry.force_open(&service) {
        Some(snapshot) => {
            tracing::warn!(service = %service, "Circuit breaker forced open by operator");
            Json(ServiceActionResponse {
                status: "success",
                message: format!("Circuit breaker for {service} forced open"),
                service: snapshot,
                timestamp: Utc::now(),
            })
            .into_response()
        }
        None => service_not_found(&service),
    }
}
