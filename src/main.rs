//! Storefront gateway
//!
//! Fronts the storefront's downstream services and isolates each one behind
//! its own circuit breaker.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──► http::server ──► http::middleware (breaker admission + timeout)
//!                  │                   │
//!                  │                   ▼
//!                  │            http::proxy (retries) ──► downstream service
//!                  │
//!                  └──► admin (status / reset / open) ──► resilience::registry
//!
//!   Cross-cutting: config, observability (tracing + Prometheus), lifecycle
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use storefront_gateway::config::{load_config, validate_config, GatewayConfig};
use storefront_gateway::lifecycle::{shutdown_signal, Shutdown};
use storefront_gateway::observability::{logging, metrics};
use storefront_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "storefront-gateway", version, about = "Storefront API gateway")]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let config = GatewayConfig::default();
            if let Err(errors) = validate_config(&config) {
                for e in &errors {
                    eprintln!("invalid default configuration: {e}");
                }
                return Err("invalid default configuration".into());
            }
            config
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "storefront-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config);
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.trigger();
    });

    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
