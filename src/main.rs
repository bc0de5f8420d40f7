//! upwatch - HTTP(S) uptime monitor
//!
//! Checks configured endpoints on their own intervals, tracks incidents per
//! failure type and serves history reports over HTTP.

mod config;
mod db;
mod incident;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::{Persistence, Store};
use notify::{Notifier, WebhookNotifier};
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("upwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting upwatch on port {}...", cfg.http_port);

    let monitors = config::load_monitors(&cfg.config_path)?;
    tracing::info!("Loaded {} monitors from {}", monitors.len(), cfg.config_path);

    // Initialize database
    tracing::info!("Using database at {}", cfg.db_path);
    let store = Arc::new(Store::new(&cfg.db_path)?);
    for monitor in &monitors {
        store.upsert_monitor(&monitor.settings())?;
    }
    tracing::info!("Database initialized successfully");

    let notifier: Option<Arc<dyn Notifier>> = match &cfg.webhook_url {
        Some(url) => {
            tracing::info!("Sending incident notifications to {}", url);
            let webhook: Arc<dyn Notifier> =
                Arc::new(WebhookNotifier::new(url.clone(), cfg.webhook_token.clone())?);
            Some(webhook)
        }
        None => None,
    };

    // Start scheduler
    let scheduler = Scheduler::new(store.clone(), notifier);
    scheduler.start(&monitors).await;
    tracing::info!("{} monitors running", scheduler.running().await);

    // Serve reports until a shutdown signal arrives
    let server = Server::new(cfg, store);
    let served = server.start(shutdown_signal()).await;

    scheduler.shutdown().await;

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping monitors...");
}
