use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set; otherwise this crate logs at info.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("analytics_service=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Counter names, kept in one place so dashboards and code agree.
pub mod counters {
    pub const SOURCE_FETCH_ATTEMPTS: &str = "source_fetch_attempts_total";
    pub const SOURCE_FETCH_FAILURES: &str = "source_fetch_failures_total";
    pub const CACHE_HITS: &str = "cache_hits_total";
    pub const CACHE_MISSES: &str = "cache_misses_total";
    pub const ROWS_DROPPED: &str = "normalize_rows_dropped_total";
    pub const READINGS_REJECTED: &str = "reconcile_rejected_readings_total";
    pub const PIPELINE_RUNS: &str = "pipeline_runs_total";
}
