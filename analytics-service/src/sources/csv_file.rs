use std::path::PathBuf;

use crate::pipeline::{PipelineError, Source};

use super::{parse_csv_table, RawTable};

/// Local or uploaded CSV export of the readings sheet.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Source for CsvFileSource {
    fn identity(&self) -> String {
        format!("file://{}", self.path.display())
    }

    async fn fetch(&self) -> Result<RawTable, PipelineError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            PipelineError::DataUnavailable(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let table = parse_csv_table(&bytes)?;
        tracing::debug!(path = %self.path.display(), rows = table.rows.len(), "loaded CSV file");
        Ok(table)
    }
}
