use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::observability::counters;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

fn describe_counters() {
    metrics::describe_counter!(counters::SOURCE_FETCH_ATTEMPTS, "Attempts to fetch the readings table");
    metrics::describe_counter!(counters::SOURCE_FETCH_FAILURES, "Fetch attempts discarded as unusable");
    metrics::describe_counter!(counters::CACHE_HITS, "Refreshes served from the cached table");
    metrics::describe_counter!(counters::CACHE_MISSES, "Refreshes that fetched a new table");
    metrics::describe_counter!(counters::ROWS_DROPPED, "Rows dropped for lacking a usable timestamp");
    metrics::describe_counter!(counters::READINGS_REJECTED, "Register readings rejected by the reconciler, by reason");
    metrics::describe_counter!(counters::PIPELINE_RUNS, "Analysis passes over a table snapshot");
}

/// Current exposition text; empty until [`init`] has installed the recorder.
pub fn render() -> String {
    PROM_HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}

/// Install the Prometheus recorder and serve `/metrics` on `bind_addr`.
/// The listener runs on its own task; bind and serve errors are only logged.
pub fn init(bind_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics bind address '{bind_addr}': {e}"))?;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus metrics recorder: {e}"))?;
    if PROM_HANDLE.set(handle).is_err() {
        anyhow::bail!("metrics recorder already installed");
    }
    describe_counters();

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(|| async { render() }));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(%addr, error = %e, "failed to bind metrics listener");
                return;
            }
        };
        tracing::info!(%addr, "serving Prometheus metrics");
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            tracing::error!(error = %e, "metrics server error");
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_bind_address() {
        let err = init("not-an-address").unwrap_err();
        assert!(err.to_string().contains("not-an-address"));
    }
}
