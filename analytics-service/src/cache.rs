use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    observability::counters,
    pipeline::{PipelineError, Source},
    sources::RawTable,
};

/// Cache key derived from a source identity.
pub fn cache_key(identity: &str) -> String {
    blake3::hash(identity.as_bytes()).to_hex().to_string()
}

/// Time-bound memoisation. Expiry is evaluated against the caller's clock.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    entries: HashMap<String, (Instant, Arc<V>)>,
}

impl<V> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: HashMap::new() }
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<Arc<V>> {
        self.entries
            .get(key)
            .filter(|(stored_at, _)| now.saturating_duration_since(*stored_at) < self.ttl)
            .map(|(_, v)| v.clone())
    }

    pub fn insert_at(&mut self, key: String, value: Arc<V>, now: Instant) {
        self.entries.insert(key, (now, value));
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A [`Source`] whose complete tables are memoised for a TTL.
///
/// Failed fetches never populate the cache.
pub struct CachedSource<S> {
    inner: S,
    key: String,
    cache: Mutex<TtlCache<RawTable>>,
}

impl<S: Source> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        let key = cache_key(&inner.identity());
        Self { inner, key, cache: Mutex::new(TtlCache::new(ttl)) }
    }

    pub async fn fetch(&self) -> Result<Arc<RawTable>, PipelineError> {
        let mut cache = self.cache.lock().await;
        if let Some(table) = cache.get_at(&self.key, Instant::now()) {
            metrics::counter!(counters::CACHE_HITS).increment(1);
            return Ok(table);
        }
        metrics::counter!(counters::CACHE_MISSES).increment(1);

        let table = Arc::new(self.inner.fetch().await?);
        cache.insert_at(self.key.clone(), table.clone(), Instant::now());
        Ok(table)
    }

    pub async fn invalidate(&self) {
        self.cache.lock().await.clear();
    }
}
