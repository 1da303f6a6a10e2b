//! Concurrent traffic through the gateway.

use std::time::Duration;

use axum::{body::Body, http::Request, http::StatusCode};
use futures_util::future::join_all;
use tower::ServiceExt;

use storefront_gateway::resilience::CircuitState;
use storefront_gateway::{GatewayServer, Shutdown};

mod common;
use common::{product_gateway, Reply, StubForwarder};

#[tokio::test]
async fn test_concurrent_healthy_traffic_over_tcp() {
    let backend = common::start_programmable_backend(|_| async { (200, r#"{"ok":true}"#.into()) }).await;

    let mut config = product_gateway(&backend.to_string());
    // Keep the window large enough that nothing here can trip it.
    config.breaker.standard.volume_threshold = 1_000;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(config);
    let registry = server.registry();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(listener, shutdown.subscribe()));

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let requests = (0..50).map(|i| {
        let client = client.clone();
        async move {
            client
                .get(format!("http://{addr}/api/products/{i}"))
                .send()
                .await
                .map(|r| r.status())
        }
    });
    let statuses = join_all(requests).await;

    assert!(statuses.iter().all(|s| matches!(s, Ok(s) if *s == 200)));
    let snap = registry.lookup("product-service").unwrap().snapshot();
    assert_eq!(snap.state, CircuitState::Closed);
    assert_eq!(snap.successes, 50);
    assert_eq!(snap.stats.total_requests, 50);

    shutdown.trigger();
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_one_probe_under_burst() {
    let stub = StubForwarder::new(|call| {
        if call < 2 {
            Reply::Status(500)
        } else {
            Reply::Delayed(Duration::from_millis(100), 200)
        }
    });
    let server = GatewayServer::with_forwarder(product_gateway("127.0.0.1:1"), stub.clone());
    let router = server.router();
    let get = || Request::builder().uri("/api/products").body(Body::empty()).unwrap();

    for _ in 0..2 {
        router.clone().oneshot(get()).await.unwrap();
    }
    let breaker = server.registry().lookup("product-service").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(250)).await;

    let burst = (0..10).map(|_| router.clone().oneshot(get()));
    let responses = join_all(burst).await;
    let statuses: Vec<_> = responses.into_iter().map(|r| r.unwrap().status()).collect();

    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let rejected = statuses.iter().filter(|s| **s == StatusCode::SERVICE_UNAVAILABLE).count();
    assert_eq!((ok, rejected), (1, 9));
    assert_eq!(stub.calls(), 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
