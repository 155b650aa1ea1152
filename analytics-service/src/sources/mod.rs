pub mod csv_file;
pub mod http_csv;
pub mod table;

use std::sync::Arc;

pub use csv_file::CsvFileSource;
pub use http_csv::{sheet_export_urls, HttpCsvSource};
pub use table::{parse_csv_table, RawTable};

use crate::{
    config::SourceConfig,
    pipeline::{PipelineError, Source},
};

/// Build the configured source: a local file if given, else remote URLs.
pub fn from_config(cfg: &SourceConfig) -> Result<Arc<dyn Source>, PipelineError> {
    if let Some(path) = &cfg.csv_path {
        return Ok(Arc::new(CsvFileSource::new(path)));
    }

    let mut urls = cfg.urls.clone();
    if let Some(sheet) = &cfg.sheet {
        urls.extend(sheet_export_urls(sheet));
    }
    Ok(Arc::new(HttpCsvSource::new(urls, cfg)?))
}
