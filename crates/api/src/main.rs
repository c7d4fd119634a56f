use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;

use copilot_api::{Runtime, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    copilot_observability::init();

    let settings = Settings::from_env().context("failed to load configuration")?;
    tracing::debug!(
        port = settings.port,
        backend = ?settings.queue_backend,
        consumer = %settings.consumer_name,
        "configuration loaded"
    );

    let runtime = Runtime::start(&settings).await?;
    let app = runtime.router();

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        async_ingestion = runtime.async_ingestion_enabled(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
