use std::sync::Arc;

use poolmate::{
    PoolmateError,
    handlers,
    state::{AppConfig, AppState},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), PoolmateError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("poolmate=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let address = config.bind_address();

    let app_state = AppState::new(config).await?;
    tracing::info!("Storage backend: {}", app_state.store.backend_name());

    let app = handlers::router(Arc::new(app_state));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
