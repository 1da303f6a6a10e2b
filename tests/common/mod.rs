//! Shared utilities for the gateway integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, response::Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use storefront_gateway::config::{BreakerSettings, GatewayConfig, ServiceConfig};
use storefront_gateway::http::{ForwardError, ForwardFuture, Forwarder};

/// Start a programmable mock backend on an ephemeral port.
///
/// The closure receives the zero-based call index and returns status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);
    let calls = Arc::new(AtomicU32::new(0));

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                // Drain the request head; test requests carry no body.
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;

                let (status, body) = f(calls.fetch_add(1, Ordering::SeqCst)).await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    502 => "502 Bad Gateway",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Settings that trip after two calls at 50% and recover quickly.
pub fn twitchy_settings() -> BreakerSettings {
    BreakerSettings {
        timeout_ms: 1_000,
        error_threshold_percentage: 50,
        reset_timeout_ms: 200,
        volume_threshold: 2,
        half_open_requests: 1,
    }
}

/// A config proxying `/api/products` to `product-service` at `address`.
pub fn product_gateway(address: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.services.push(ServiceConfig {
        name: "product-service".into(),
        address: address.into(),
        path_prefix: "/api/products".into(),
        profile: None,
    });
    config.breaker.standard = twitchy_settings();
    config
}

/// What the stub does on a given call.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Status(u16),
    Delayed(Duration, u16),
    Unreachable,
}

/// In-process forwarder driven by a script over the call index.
pub struct StubForwarder {
    calls: AtomicU32,
    script: Box<dyn Fn(u32) -> Reply + Send + Sync>,
}

impl StubForwarder {
    pub fn new(script: impl Fn(u32) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            script: Box::new(script),
        })
    }

    pub fn always(status: u16) -> Arc<Self> {
        Self::new(move |_| Reply::Status(status))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Forwarder for StubForwarder {
    fn forward(&self, _service: &ServiceConfig, request: Request<Body>) -> ForwardFuture {
        let reply = (self.script)(self.calls.fetch_add(1, Ordering::SeqCst));
        let echoed = request.headers().get("x-request-id").cloned();

        Box::pin(async move {
            let status = match reply {
                Reply::Status(status) => status,
                Reply::Delayed(delay, status) => {
                    tokio::time::sleep(delay).await;
                    status
                }
                Reply::Unreachable => return Err(ForwardError::InvalidAddress("stub".into())),
            };
            let mut response = axum::http::Response::builder().status(status);
            if let Some(id) = echoed {
                response = response.header("x-upstream-request-id", id);
            }
            Ok(response.body(Body::from(r#"{"items":[]}"#)).unwrap())
        })
    }
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
