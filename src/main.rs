use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use image_upscale_server::{build_state, config::Config, create_app};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("image_upscale_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let port = config.port;
    let sweep_every = Duration::from_secs(config.session_sweep_interval_secs);

    tracing::info!(
        "Starting image-upscale-server v{} (max file size {} bytes)",
        env!("CARGO_PKG_VERSION"),
        config.max_file_size
    );

    let state = build_state(config).await?;
    let sweeper = state.sessions.clone().spawn_sweeper(sweep_every);
    let app = create_app(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
