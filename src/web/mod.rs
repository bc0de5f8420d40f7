//! Reporting API server.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
}

/// Web server for the reporting API.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>) -> Self {
        Self {
            state: AppState { config, store },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/api/reports", get(handlers::handle_reports))
            .route("/api/reports/detail", get(handlers::handle_report_detail))
            .route("/api/reports/incidents", get(handlers::handle_incidents))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` completes.
    pub async fn start<F>(
        &self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    async fn serve<F>(
        &self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
