use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    config::{SheetConfig, SourceConfig},
    observability::counters,
    pipeline::{PipelineError, Source},
};

use super::{parse_csv_table, RawTable};

/// Remote CSV export (typically a published spreadsheet).
///
/// Candidate URLs are tried in order; each attempt has its own timeout and
/// either yields a complete, plausible table or is discarded.
pub struct HttpCsvSource {
    client: reqwest::Client,
    urls: Vec<String>,
    timeout: Duration,
    max_attempts: usize,
    min_body_bytes: usize,
    min_columns: usize,
}

impl HttpCsvSource {
    pub fn new(urls: Vec<String>, cfg: &SourceConfig) -> Result<Self, PipelineError> {
        if urls.is_empty() {
            return Err(PipelineError::Source("no source URLs configured".to_string()));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Source(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            urls,
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
            max_attempts: cfg.max_attempts.max(1),
            min_body_bytes: cfg.min_body_bytes,
            min_columns: cfg.min_columns,
        })
    }

    async fn attempt(&self, url: &str) -> Result<RawTable, String> {
        let response = self
            .client
            .get(with_cache_buster(url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read body: {e}"))?;
        if body.len() <= self.min_body_bytes {
            return Err(format!("body too short ({} bytes)", body.len()));
        }

        let table = parse_csv_table(&body).map_err(|e| e.to_string())?;
        if table.headers.len() < self.min_columns {
            return Err(format!("only {} columns", table.headers.len()));
        }
        if table.column_any(&["Timestamp", "Date"]).is_none() {
            return Err("no Timestamp or Date column".to_string());
        }
        Ok(table)
    }
}

/// Export URL variants for a published sheet, most reliable first.
pub fn sheet_export_urls(sheet: &SheetConfig) -> Vec<String> {
    let base = format!("https://docs.google.com/spreadsheets/d/{}", sheet.sheet_id);
    let mut urls = Vec::with_capacity(3);
    if let Some(gid) = &sheet.gid {
        urls.push(format!("{base}/export?format=csv&gid={gid}"));
    }
    urls.push(format!("{base}/gviz/tq?tqx=out:csv&sheet={}", sheet.sheet_name));
    urls.push(format!("{base}/export?format=csv"));
    urls
}

fn with_cache_buster(url: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}cachebust={now}")
}

#[async_trait::async_trait]
impl Source for HttpCsvSource {
    fn identity(&self) -> String {
        self.urls.join(" | ")
    }

    async fn fetch(&self) -> Result<RawTable, PipelineError> {
        let mut last_error = String::new();
        for (attempt, url) in self.urls.iter().cycle().take(self.max_attempts).enumerate() {
            metrics::counter!(counters::SOURCE_FETCH_ATTEMPTS).increment(1);
            match self.attempt(url).await {
                Ok(table) => {
                    tracing::info!(attempt = attempt + 1, url = %url, rows = table.rows.len(), "fetched source table");
                    return Ok(table);
                }
                Err(e) => {
                    metrics::counter!(counters::SOURCE_FETCH_FAILURES).increment(1);
                    tracing::warn!(attempt = attempt + 1, url = %url, error = %e, "source fetch attempt failed");
                    last_error = e;
                }
            }
        }

        Err(PipelineError::DataUnavailable(format!(
            "all {} fetch attempts failed; last error: {last_error}",
            self.max_attempts
        )))
    }
}
