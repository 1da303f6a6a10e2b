//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: one protected route set per service, the admin
//!   endpoints and a liveness probe
//! - Wire up middleware (request ID, tracing, overall timeout)
//! - Pre-register a breaker for every configured service
//! - Serve until the shutdown channel fires
//!
//! # Data Flow
//! ```text
//! request ─► SetRequestId ─► Trace ─► PropagateRequestId ─► Timeout
//!         ─► /api/<svc>/*  ─► circuit_breaker_middleware ─► proxy_handler ─► Forwarder
//!         ─► /circuit-breaker/* ─► admin handlers
//!         ─► otherwise 404 NOT_FOUND
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{StatusCode, Uri},
    middleware,
    response::Response,
    routing::{any, get},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::{GatewayConfig, ServiceConfig};
use crate::http::middleware::{circuit_breaker_middleware, ProtectionState};
use crate::http::proxy::{proxy_handler, Forwarder, HttpForwarder, ProxyState};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::response::error_response;
use crate::resilience::retries::RetryBudget;
use crate::resilience::BreakerRegistry;

/// Retries always allowed regardless of the budget ratio.
const MIN_RETRIES: u64 = 10;

/// HTTP front of the storefront gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    registry: Arc<BreakerRegistry>,
}

impl GatewayServer {
    /// Build a server that forwards over HTTP.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_forwarder(config, Arc::new(HttpForwarder::new()))
    }

    /// Build a server with a custom downstream transport.
    pub fn with_forwarder(config: GatewayConfig, forwarder: Arc<dyn Forwarder>) -> Self {
        let registry = config
            .services
            .iter()
            .fold(BreakerRegistry::new(config.breaker.clone()), |registry, service| {
                match service.profile {
                    Some(kind) => registry.with_profile(&service.name, kind),
                    None => registry,
                }
            });
        let registry = Arc::new(registry);
        for service in &config.services {
            registry.get_default(&service.name);
        }

        let router = Self::build_router(&config, registry.clone(), forwarder);
        Self {
            router,
            config,
            registry,
        }
    }

    #[allow(deprecated)]
    fn build_router(
        config: &GatewayConfig,
        registry: Arc<BreakerRegistry>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Router {
        let budget = Arc::new(RetryBudget::new(config.retries.budget_ratio, MIN_RETRIES));

        let mut router = Router::new().route("/health", get(health_handler));
        for service in &config.services {
            let proxy = ProxyState {
                service: Arc::new(service.clone()),
                forwarder: forwarder.clone(),
                retries: config.retries.clone(),
                budget: budget.clone(),
            };
            router = router.merge(service_router(service, registry.clone(), proxy));
        }
        if config.admin.enabled {
            router = router.merge(setup_admin_router(registry, &config.admin));
        }

        router
            .fallback(not_found_handler)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The assembled router, for driving in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn registry(&self) -> Arc<BreakerRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = self.config.services.len(),
            "Gateway listening"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown requested, draining connections");
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Routes for one service's prefix, guarded by its breaker.
fn service_router(service: &ServiceConfig, registry: Arc<BreakerRegistry>, proxy: ProxyState) -> Router {
    let prefix = service.path_prefix.trim_end_matches('/');
    let (exact, nested) = if prefix.is_empty() {
        ("/".to_string(), "/{*rest}".to_string())
    } else {
        (prefix.to_string(), format!("{prefix}/{{*rest}}"))
    };

    let protection = ProtectionState::new(registry, &service.name);
    Router::new()
        .route(&exact, any(proxy_handler))
        .route(&nested, any(proxy_handler))
        .route_layer(middleware::from_fn_with_state(protection, circuit_breaker_middleware))
        .with_state(proxy)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found_handler(uri: Uri) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        format!("No route for {}", uri.path()),
        None,
    )
}
