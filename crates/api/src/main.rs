//! crmsync - HubSpot sync service
//!
//! Serves the webhook and queue routes and runs queue maintenance until
//! interrupted.

use std::sync::Arc;

use anyhow::Context;
use crmsync_app::utils::logging::init_tracing;
use crmsync_app::{router, AppContext};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env must be applied before the config loader reads CRMSYNC_* variables
    let dotenv = dotenvy::dotenv();

    let config = crmsync_infra::config::load().context("failed to load configuration")?;
    init_tracing(&config.logging);

    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(err) => warn!(error = %err, "no .env file loaded"),
    }

    let bind_addr = config.server.bind_addr.clone();
    let context = Arc::new(
        AppContext::new_with_config(config).await.context("failed to initialise application")?,
    );
    context.start_background().await.context("failed to start queue maintenance")?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "crmsync listening");

    axum::serve(listener, router(context.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    context.shutdown().await.context("shutdown failed")?;
    info!("crmsync stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
