use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linesync_server::{config::Args, create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let log_filter = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "linesync_server={0},linesync_core={0},tower_http=info",
                    log_filter
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Create configuration
    let config = args.into_config();
    let listen_addr = config.listen_addr();
    let base_url = config.base_url();
    let shutdown_timeout = config.shutdown_timeout;

    // Open the store and register topics
    let state = match AppState::open(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize sync engine");
            return Err(e.into());
        }
    };

    let app = create_router(state.clone());
    let listener = TcpListener::bind(&listen_addr).await?;

    tracing::info!("LineSync server starting on {}", base_url);
    tracing::info!("WebSocket endpoint at {}/ws", base_url);
    tracing::info!("Health check at {}/health", base_url);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    match tokio::time::timeout(shutdown_timeout, state.shutdown()).await {
        Ok(Ok(())) => tracing::info!("shutdown complete"),
        Ok(Err(e)) => tracing::error!(error = %e, "failed to flush store on shutdown"),
        Err(_) => tracing::warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "shutdown timed out, exiting anyway"
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
