use std::{sync::Arc, time::Duration};

use crate::{
    cache::CachedSource,
    config::{AnalyticsConfig, ConfigError},
    observability::counters,
    report::{self, Analysis, QueryError, ReportQuery},
    sources::RawTable,
};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// No usable table could be obtained; surfaced as a "no data" state.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid query: {0}")]
    Query(#[from] QueryError),
}

/// Where raw readings come from. A fetch yields a complete table or an error,
/// never a partial table.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Stable identity of the underlying data source, used as the cache key.
    fn identity(&self) -> String;

    async fn fetch(&self) -> Result<RawTable, PipelineError>;
}

#[async_trait::async_trait]
impl<S: Source + ?Sized> Source for Arc<S> {
    fn identity(&self) -> String {
        (**self).identity()
    }

    async fn fetch(&self) -> Result<RawTable, PipelineError> {
        (**self).fetch().await
    }
}

/// One refresh = fetch (possibly cached) followed by the pure analysis.
pub struct Pipeline<S> {
    source: CachedSource<S>,
    config: Arc<AnalyticsConfig>,
}

impl<S: Source> Pipeline<S> {
    pub fn new(source: S, cache_ttl: Duration, config: AnalyticsConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            source: CachedSource::new(source, cache_ttl),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub async fn run(&self, query: &ReportQuery) -> Result<Analysis, PipelineError> {
        metrics::counter!(counters::PIPELINE_RUNS).increment(1);
        let table = self.source.fetch().await?;
        report::analyze(&table, &self.config, query)
    }

    /// Drop the cached snapshot so the next run fetches afresh.
    pub async fn invalidate(&self) {
        self.source.invalidate().await;
    }
}
