//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::request::Builder,
    response::Response,
    Router,
};
use ledger_gateway::config::{Environment, LedgerConfig};
use ledger_gateway::http::{router, AppState, SecurityPipeline};
use ledger_gateway::identity::MemoryUserStore;
use ledger_gateway::security::{ManualClock, MemoryStore};
use serde_json::Value;

pub const ALLOWED_ORIGIN: &str = "https://ledger.example";
pub const EVIL_ORIGIN: &str = "https://evil.example";

/// Default config for `environment` with one explicitly allowed origin.
pub fn config(environment: Environment) -> LedgerConfig {
    let mut config = LedgerConfig::default();
    config.server.environment = environment;
    config.cors.allowed_origins = vec![ALLOWED_ORIGIN.to_string()];
    config
}

/// A pipeline-wrapped application plus the clock driving its rate limits.
pub struct TestApp {
    pub router: Router,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new(config: &LedgerConfig) -> Self {
        Self::with_routes(config, router(AppState::new(Arc::new(MemoryUserStore::new()))))
    }

    pub fn with_routes(config: &LedgerConfig, routes: Router) -> Self {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let router = SecurityPipeline::new(config, store).apply(routes);
        Self { router, clock }
    }

    pub async fn send(&self, request: Request) -> Response {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Request builder carrying a peer address, as the server would attach.
pub fn from_client(method: &str, uri: &str, ip: &str) -> Builder {
    let addr: SocketAddr = format!("{ip}:50000").parse().unwrap();
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(addr))
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request {
    from_client(method, uri, "203.0.113.10")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request {
    from_client("GET", uri, "203.0.113.10").body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
