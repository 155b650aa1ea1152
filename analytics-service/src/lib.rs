pub mod cache;
pub mod config;
pub mod evaluate;
pub mod export;
pub mod http_api;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod sources;
pub mod transform;

pub use pipeline::{Pipeline, PipelineError, Source};
pub use report::{analyze, Analysis, ReportQuery};
