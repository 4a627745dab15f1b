//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the application router and wrap it in the security pipeline
//! - Bind the server to a listener with per-connection peer addresses
//! - Drain in-flight requests on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::LedgerConfig;
use crate::http::pipeline::SecurityPipeline;
use crate::http::routes::{router, AppState};
use crate::identity::UserStore;
use crate::security::store::RateLimitStore;

/// HTTP server for the ledger application.
pub struct HttpServer {
    router: Router,
    config: LedgerConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and stores.
    pub fn new(
        config: LedgerConfig,
        rate_limits: Arc<dyn RateLimitStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let pipeline = SecurityPipeline::new(&config, rate_limits);
        let router = pipeline.apply(router(AppState::new(users)));
        Self { router, config }
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = ?self.config.server.environment,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
