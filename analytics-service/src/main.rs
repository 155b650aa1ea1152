use anyhow::Result;
use analytics_service::{
    config::AppConfig,
    http_api::{self, AppState},
    metrics_server, observability, sources, Pipeline, Source,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let source = sources::from_config(&cfg.source)?;
    tracing::info!(source = %source.identity(), ttl_secs = cfg.cache.ttl_secs, "reading source configured");

    let pipeline = Pipeline::new(source, Duration::from_secs(cfg.cache.ttl_secs), cfg.analytics)?;
    let app = http_api::router(AppState { pipeline: Arc::new(pipeline) });

    let addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server.bind_addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "analytics API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    Ok(())
}
