// src/main.rs
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod poll;
mod routes;
mod services;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use state::AppState;
use store::{PgStore, PollStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok(); // Load environment variables from .env file

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;

    let pool = db::create_pool(&config).await?;
    let store: Arc<dyn PollStore> = Arc::new(PgStore::new(pool));

    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    if config.one_vote_per_ip {
        info!("Rejecting repeat votes from the same address");
    }

    let app = routes::create_routes(AppState::new(store, config));

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Server running on {address}");
    axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install terminate handler: {e}");
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

    // In-flight submissions get a window to commit before connections close.
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
