use anyhow::{bail, Result};
use analytics_service::{
    config::AppConfig,
    export, observability,
    report,
    sources::CsvFileSource,
    ReportQuery, Source,
};
use std::{env, path::Path};

/// One-shot analysis of a CSV export. Prints the KPI report as JSON, or with
/// `--out <dir>` writes report.csv, intervals.csv and events.csv instead.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: analyze_csv <csv_path> [config.toml] [--out <dir>]");
    }

    let csv_path = &args[1];
    let mut config_path = None;
    let mut out_dir = None;
    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        if arg == "--out" {
            let Some(dir) = rest.next() else {
                bail!("--out needs a directory");
            };
            out_dir = Some(dir.clone());
        } else {
            config_path = Some(arg.clone());
        }
    }

    let cfg = match config_path {
        Some(path) => AppConfig::from_toml(&std::fs::read_to_string(path)?)?,
        None => AppConfig::default(),
    };
    cfg.analytics.validate()?;

    let table = CsvFileSource::new(csv_path).fetch().await?;
    let analysis = report::analyze(&table, &cfg.analytics, &ReportQuery::default())?;

    tracing::info!(
        rows = table.rows.len(),
        readings = analysis.report.total_readings,
        events = analysis.events.len(),
        snapshot = %analysis.report.snapshot_id,
        "analysis complete"
    );

    match out_dir {
        Some(dir) => {
            let dir = Path::new(&dir);
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join("report.csv"), export::report_csv(&analysis, &cfg.analytics.tariff.schedule)?)?;
            std::fs::write(dir.join("intervals.csv"), export::intervals_csv(&analysis.intervals)?)?;
            std::fs::write(dir.join("events.csv"), export::events_csv(&analysis.events)?)?;
            println!("wrote report.csv, intervals.csv, events.csv to {}", dir.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&analysis.report)?),
    }

    Ok(())
}
