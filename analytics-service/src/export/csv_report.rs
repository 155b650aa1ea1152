//! Downloadable CSV renditions of an [`Analysis`].
//!
//! The report export is a sectioned sheet: a title row per section, then the
//! section's own header and rows, then a blank separator row.

use meter_domain::{
    AnomalyEvent, AnomalyMetric, ConsumptionInterval, MeterRole, SavingsStatus, Severity, TodPeriod,
};
use time::{macros::format_description, PrimitiveDateTime};

use crate::{config::TodSchedule, report::Analysis};

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush CSV output: {0}")]
    Flush(String),
}

struct Sheet {
    wtr: csv::Writer<Vec<u8>>,
}

impl Sheet {
    fn new() -> Self {
        Self { wtr: csv::WriterBuilder::new().flexible(true).from_writer(Vec::new()) }
    }

    fn row<I, T>(&mut self, cells: I) -> Result<(), ExportError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.wtr.write_record(cells)?;
        Ok(())
    }

    fn section(&mut self, title: &str) -> Result<(), ExportError> {
        self.row([title])
    }

    fn end_section(&mut self) -> Result<(), ExportError> {
        self.wtr.write_record(None::<&[u8]>)?;
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, ExportError> {
        self.wtr.into_inner().map_err(|e| ExportError::Flush(e.to_string()))
    }
}

fn ts(t: PrimitiveDateTime) -> String {
    t.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_else(|_| t.to_string())
}

fn hhmm(t: PrimitiveDateTime) -> String {
    t.format(format_description!("[hour]:[minute]")).unwrap_or_else(|_| t.time().to_string())
}

fn num(v: f64, decimals: usize) -> String {
    format!("{v:.decimals$}")
}

/// Blank for "not available", so it is never mistaken for a measured zero.
fn opt(v: Option<f64>, decimals: usize) -> String {
    v.map(|v| num(v, decimals)).unwrap_or_default()
}

fn window(start: u8, end: u8) -> String {
    format!("{start:02}:00-{end:02}:00")
}

fn status(s: SavingsStatus) -> &'static str {
    match s {
        SavingsStatus::Applied => "applied",
        SavingsStatus::BelowMinimum => "below minimum",
        SavingsStatus::NotApplicable => "not applicable",
        SavingsStatus::MissingInput => "missing input",
    }
}

pub fn report_csv(analysis: &Analysis, schedule: &TodSchedule) -> Result<Vec<u8>, ExportError> {
    let r = &analysis.report;
    let mut s = Sheet::new();

    s.section("Period")?;
    s.row(["start", "end", "data_days", "readings", "meter", "snapshot"])?;
    s.row([
        r.period.start.map(ts).unwrap_or_default(),
        r.period.end.map(ts).unwrap_or_default(),
        r.period.data_days.to_string(),
        r.total_readings.to_string(),
        r.scope.meter.clone().unwrap_or_else(|| "all".to_string()),
        r.snapshot_id.clone(),
    ])?;
    s.end_section()?;

    let e = &r.energy;
    s.section("Energy")?;
    s.row(["total_kwh", "total_cost", "hierarchy", "weekday_avg_kwh", "weekend_avg_kwh", "carbon_kg"])?;
    s.row([
        num(e.total_kwh, 2),
        num(e.total_cost, 2),
        format!("{:?}", e.hierarchy_mode).to_lowercase(),
        opt(e.weekday_avg_daily_kwh, 2),
        opt(e.weekend_avg_daily_kwh, 2),
        num(r.carbon_kg, 1),
    ])?;
    s.end_section()?;

    s.section("ToD breakdown")?;
    s.row(["period", "hours", "energy_kwh", "share_pct", "rate", "cost"])?;
    for period in TodPeriod::ALL {
        let hours = match period {
            TodPeriod::Peak => window(schedule.peak_start, schedule.peak_end),
            TodPeriod::Normal => window(schedule.normal_start, schedule.normal_end),
            TodPeriod::Offpeak => "remaining hours".to_string(),
        };
        let energy = e.tod_energy_kwh.get(period);
        let share = if e.total_kwh > 0.0 { energy / e.total_kwh * 100.0 } else { 0.0 };
        s.row([
            period.to_string(),
            hours,
            num(energy, 2),
            num(share, 1),
            num(e.tod_rates.get(period), 2),
            num(e.tod_cost.get(period), 2),
        ])?;
    }
    s.end_section()?;

    s.section("Meters")?;
    s.row(["meter", "role", "in_site_total", "energy_kwh", "cost", "clamped_kwh", "other_loads_kwh", "share_pct"])?;
    for m in &e.meters {
        let role = match &m.role {
            MeterRole::Main => "main".to_string(),
            MeterRole::Sub { parent } => format!("sub of {parent}"),
            MeterRole::Independent => "independent".to_string(),
        };
        s.row([
            m.meter_id.clone(),
            role,
            m.included_in_site_total.to_string(),
            num(m.energy_kwh, 2),
            num(m.cost, 2),
            num(m.clamped_kwh, 2),
            opt(m.other_loads_kwh, 2),
            opt(m.share_of_site_pct, 1),
        ])?;
    }
    s.end_section()?;

    let d = &r.demand;
    s.section("Demand")?;
    s.row([
        "contracted_kw",
        "peak_kw",
        "max_demand_kw",
        "max_kva",
        "load_avg_pct",
        "load_max_pct",
        "idle_pct",
        "run_hours",
    ])?;
    s.row([
        num(d.contracted_kw, 1),
        opt(d.peak_demand_kw, 2),
        opt(d.max_demand_recorded_kw, 2),
        opt(d.apparent_power_max_kva, 2),
        opt(d.load_avg_pct, 1),
        opt(d.load_max_pct, 1),
        opt(d.idle_time_pct, 1),
        opt(d.run_hours, 1),
    ])?;
    for bucket in &d.load_distribution {
        s.row([format!("load {}", bucket.label()), num(bucket.share_pct, 1)])?;
    }
    s.end_section()?;

    let pf = &r.power_factor;
    s.section("Power factor")?;
    s.row(["valid_readings", "avg_pf", "min_pf", "sustained_alerts", "sustained_minutes"])?;
    s.row([
        pf.valid_readings.to_string(),
        opt(pf.avg_pf, 3),
        opt(pf.min_pf, 3),
        pf.sustained_alerts.to_string(),
        num(pf.sustained_minutes, 0),
    ])?;
    for band in &pf.bands {
        s.row([format!("below {:.2}", band.threshold), num(band.pct_below, 1)])?;
    }
    s.end_section()?;

    s.section("Unbalance")?;
    s.row(["kind", "avg_pct", "max_pct", "warning_threshold_pct", "warnings"])?;
    for (kind, u) in [("voltage", &r.unbalance.voltage), ("current", &r.unbalance.current)] {
        s.row([
            kind.to_string(),
            opt(u.avg_pct, 2),
            opt(u.max_pct, 2),
            num(u.warning_threshold_pct, 1),
            u.warning_count.to_string(),
        ])?;
    }
    s.end_section()?;

    let g = &r.grid;
    s.section("Grid")?;
    s.row(["quantity", "min", "max"])?;
    s.row(["vln".to_string(), opt(g.vln_min, 1), opt(g.vln_max, 1)])?;
    s.row(["vll".to_string(), opt(g.vll_min, 1), opt(g.vll_max, 1)])?;
    s.row(["frequency_hz".to_string(), opt(g.frequency_min_hz, 2), opt(g.frequency_max_hz, 2)])?;
    s.end_section()?;

    let f = &r.fire_risk;
    s.section("Fire risk")?;
    s.row(["tier", "readings", "pct"])?;
    for tier in Severity::ALL {
        s.row([tier.to_string(), f.counts.get(tier).to_string(), num(f.percentages.get(tier), 1)])?;
    }
    s.row(["neutral_avg_a".to_string(), opt(f.neutral_avg_a, 2)])?;
    s.row(["neutral_max_a".to_string(), opt(f.neutral_max_a, 2)])?;
    s.end_section()?;

    s.section("Sustained PF events")?;
    s.row(["#", "date", "start", "end", "duration_min", "min_pf", "avg_pf", "location", "severity"])?;
    let pf_events = analysis.events.iter().filter(|e| e.metric == AnomalyMetric::PowerFactor);
    for (i, ev) in pf_events.enumerate() {
        s.row([
            (i + 1).to_string(),
            ev.start.date().to_string(),
            hhmm(ev.start),
            hhmm(ev.end),
            num(ev.duration_minutes, 0),
            opt(ev.min_value, 3),
            opt(ev.avg_value, 3),
            ev.meter_id.clone(),
            ev.severity.to_string(),
        ])?;
    }
    s.end_section()?;

    s.section("Fire risk events")?;
    s.row(["#", "date", "start", "end", "duration_min", "max_neutral_a", "location", "severity"])?;
    let fire_events = analysis.events.iter().filter(|e| e.metric == AnomalyMetric::NeutralCurrent);
    for (i, ev) in fire_events.enumerate() {
        s.row([
            (i + 1).to_string(),
            ev.start.date().to_string(),
            hhmm(ev.start),
            hhmm(ev.end),
            num(ev.duration_minutes, 0),
            opt(ev.max_value, 2),
            ev.meter_id.clone(),
            ev.severity.to_string(),
        ])?;
    }
    s.end_section()?;

    let sv = &r.savings;
    s.section("Savings")?;
    s.row(["item", "status", "monthly_amount", "justification"])?;
    for line in &sv.line_items {
        s.row([
            format!("{:?}", line.kind),
            status(line.status).to_string(),
            num(line.monthly_amount, 0),
            line.justification.clone(),
        ])?;
    }
    s.row(["gross_monthly".to_string(), String::new(), num(sv.gross_monthly, 0)])?;
    s.row([
        format!("realizable_monthly (x{})", sv.realization_factor),
        String::new(),
        num(sv.realizable_monthly, 0),
    ])?;
    s.row([format!("this_period ({} days)", sv.period_days), String::new(), num(sv.period_amount, 0)])?;
    s.row(["annual".to_string(), String::new(), num(sv.annual_amount, 0)])?;
    s.row([sv.label.as_str()])?;
    s.end_section()?;

    let p = &r.tod_planner;
    s.section("ToD planner")?;
    s.row(["", "peak", "normal", "offpeak"])?;
    s.row([
        "target_pct".to_string(),
        num(p.target_split.peak * 100.0, 0),
        num(p.target_split.normal * 100.0, 0),
        num(p.target_split.offpeak * 100.0, 0),
    ])?;
    s.row([
        "kw_baseline".to_string(),
        opt(p.kw_baselines.peak, 2),
        opt(p.kw_baselines.normal, 2),
        opt(p.kw_baselines.offpeak, 2),
    ])?;
    s.row([
        "latest",
        "label",
        "total_kwh",
        "peak_pct",
        "normal_pct",
        "offpeak_pct",
        "actual_cost",
        "target_cost",
        "savings",
        "shift_from_peak_kwh",
        "optimal",
    ])?;
    for (kind, c) in [("week", &p.latest_week), ("month", &p.latest_month)] {
        let Some(c) = c else { continue };
        s.row([
            kind.to_string(),
            c.label.clone(),
            num(c.total_kwh, 2),
            num(c.actual_pct.peak, 1),
            num(c.actual_pct.normal, 1),
            num(c.actual_pct.offpeak, 1),
            num(c.actual_cost, 2),
            num(c.target_cost, 2),
            num(c.savings, 2),
            num(c.shift_from_peak_kwh, 2),
            c.already_optimal.to_string(),
        ])?;
    }
    s.row(["rollup", "label", "peak_kwh", "normal_kwh", "offpeak_kwh", "cost"])?;
    let rollups = p.weekly.iter().map(|w| ("week", w)).chain(p.monthly.iter().map(|m| ("month", m)));
    for (kind, roll) in rollups {
        s.row([
            kind.to_string(),
            roll.label.clone(),
            num(roll.energy_kwh.peak, 2),
            num(roll.energy_kwh.normal, 2),
            num(roll.energy_kwh.offpeak, 2),
            num(roll.cost.total(), 2),
        ])?;
    }
    s.end_section()?;

    let q = &r.data_quality;
    s.section("Data quality")?;
    s.row([
        "rows_total",
        "rows_dropped",
        "missing_values",
        "timestamp_encoding",
        "readings_without_energy",
        "rejected_decreases",
        "rejected_implausible",
        "resets",
        "clamped_sub_meter_kwh",
        "absent_columns",
    ])?;
    s.row([
        q.rows_total.to_string(),
        q.rows_dropped.to_string(),
        q.missing_values.to_string(),
        format!("{:?}", q.timestamp_encoding).to_lowercase(),
        q.readings_without_energy.to_string(),
        q.rejected_decreases.to_string(),
        q.rejected_implausible_rate.to_string(),
        q.resets_detected.to_string(),
        num(q.clamped_sub_meter_kwh, 2),
        q.absent_columns.join("; "),
    ])?;

    s.finish()
}

pub fn intervals_csv(intervals: &[ConsumptionInterval]) -> Result<Vec<u8>, ExportError> {
    let mut s = Sheet::new();
    s.row(["meter_id", "period_start", "period_end", "tod_period", "energy_kwh", "cost"])?;
    for i in intervals {
        s.row([
            i.meter_id.clone(),
            ts(i.period_start),
            ts(i.period_end),
            i.tod_period.to_string(),
            num(i.energy_kwh, 4),
            num(i.cost, 4),
        ])?;
    }
    s.finish()
}

pub fn events_csv(events: &[AnomalyEvent]) -> Result<Vec<u8>, ExportError> {
    let mut s = Sheet::new();
    s.row([
        "meter_id", "metric", "severity", "start", "end", "samples", "duration_min", "min", "max", "avg",
    ])?;
    for e in events {
        let metric = match e.metric {
            AnomalyMetric::PowerFactor => "power_factor",
            AnomalyMetric::NeutralCurrent => "neutral_current",
        };
        s.row([
            e.meter_id.clone(),
            metric.to_string(),
            e.severity.to_string(),
            ts(e.start),
            ts(e.end),
            e.sample_count.to_string(),
            num(e.duration_minutes, 0),
            opt(e.min_value, 3),
            opt(e.max_value, 3),
            opt(e.avg_value, 3),
        ])?;
    }
    s.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AnalyticsConfig, report::{analyze, ReportQuery}, sources::parse_csv_table};

    const CSV: &str = "Timestamp,Location,Energy_kWh,kW_Total,Current_Total,PF_Avg\n\
        2024-06-10 17:00:00,Shed_01,100,20,30,0.80\n\
        2024-06-10 17:05:00,Shed_01,101,20,30,0.82\n\
        2024-06-10 17:10:00,Shed_01,102,20,30,0.95\n";

    fn analysis() -> Analysis {
        let table = parse_csv_table(CSV.as_bytes()).unwrap();
        analyze(&table, &AnalyticsConfig::default(), &ReportQuery::default()).unwrap()
    }

    #[test]
    fn report_has_every_section_and_the_disclaimer() {
        let a = analysis();
        let out = String::from_utf8(report_csv(&a, &TodSchedule::default()).unwrap()).unwrap();

        for title in [
            "Period",
            "Energy",
            "ToD breakdown",
            "Meters",
            "Demand",
            "Power factor",
            "Unbalance",
            "Grid",
            "Fire risk",
            "Sustained PF events",
            "Fire risk events",
            "Savings",
            "ToD planner",
            "Data quality",
        ] {
            assert!(out.lines().any(|l| l == title), "missing section {title}");
        }
        assert!(out.contains("Conservative estimate, not a guarantee"));
        assert!(out.contains("PEAK,17:00-23:00,2.00,100.0,8.37,16.74"));
        assert!(out.contains("1,2024-06-10,17:00,17:05,10,0.800,0.810,Shed_01,HIGH"));
        assert!(out.contains("load <= 10%,100.0"));
        assert!(out.contains("vln,,"));
    }

    #[test]
    fn planner_section_compares_the_latest_week() {
        let a = analysis();
        let out = String::from_utf8(report_csv(&a, &TodSchedule::default()).unwrap()).unwrap();

        assert!(out.contains("target_pct,10,45,45"));
        assert!(out.contains("kw_baseline,20.00,,"));
        // 2 kWh all at peak: 16.74 actual against 0.2×8.37 + 0.9×6.87 + 0.9×5.18
        assert!(out.contains("week,2024-W24,2.00,100.0,0.0,0.0,16.74,12.52,4.22,1.80,false"));
        assert!(out.contains("month,2024-06,2.00,0.00,0.00,16.74"));
        assert!(out.contains("Neutral_Current_A"));
    }

    #[test]
    fn interval_and_event_sheets() {
        let a = analysis();
        let intervals = String::from_utf8(intervals_csv(&a.intervals).unwrap()).unwrap();
        let mut lines = intervals.lines();
        assert_eq!(lines.next(), Some("meter_id,period_start,period_end,tod_period,energy_kwh,cost"));
        assert_eq!(lines.next(), Some("Shed_01,2024-06-10 17:00:00,2024-06-10 17:05:00,PEAK,1.0000,8.3700"));

        let events = String::from_utf8(events_csv(&a.events).unwrap()).unwrap();
        assert_eq!(events.lines().count(), 2);
        assert!(events.contains("power_factor,HIGH"));
    }
}
