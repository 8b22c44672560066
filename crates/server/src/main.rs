use std::{net::SocketAddr, sync::Arc};

use server_api::ApiContext;
use storage::Storage;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::build_router;
use app_state::AppState;
use config::{load_settings, normalize_database_url};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    init_tracing(&settings.log_level);

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::connect(&database_url, settings.max_connections)
        .await
        .map_err(|error| {
            error!(
                %database_url,
                error = %format!("{error:#}"),
                "failed to open SQLite database; verify parent directory exists and permissions are correct"
            );
            error
        })?;
    let api = ApiContext::from_storage(storage.clone())
        .with_expose_internal_errors(settings.expose_internal_errors);

    let state = AppState {
        api,
        storage,
        body_limit_bytes: settings.body_limit_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }
}
