pub mod csv_report;

pub use csv_report::{events_csv, intervals_csv, report_csv, ExportError};
