use std::sync::Arc;

use anyhow::Result;
use axum::serve;
use tokio::net::TcpListener;
use tracing::info;

use crate::build_dispatcher;
use crate::config::GatewayConfig;
use crate::http::{GatewayState, build_router};

/// Starts the gateway HTTP server using the provided configuration.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let dispatcher = build_dispatcher(&config)?;
    let state = Arc::new(GatewayState {
        dispatcher: dispatcher.clone(),
    });
    let router = build_router(state, config.submit_rate_cap, config.submit_rate_refill);
    let listener = TcpListener::bind(config.addr).await?;
    info!("boost-gateway listening on {}", config.addr);

    serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            let cancelled = dispatcher.shutdown();
            info!(cancelled, "shutdown requested");
        })
        .await?;

    Ok(())
}
