//! One refresh: raw table in, KPI report plus intervals and events out.

use std::collections::BTreeMap;

use meter_domain::{
    AnomalyEvent, ConsumptionInterval, DataQuality, EnergySummary, KpiReport, Reading, ReportPeriod,
    ReportScope,
};
use serde::Serialize;
use time::{macros::format_description, Date, PrimitiveDateTime};

use crate::{
    config::AnalyticsConfig,
    evaluate::{self, SavingsInputs},
    pipeline::PipelineError,
    sources::RawTable,
    transform::{self, RejectReason},
};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    Date(String),
    #[error("'from' ({from}) is after 'to' ({to})")]
    Range { from: Date, to: Date },
    #[error("unknown meter '{0}'")]
    UnknownMeter(String),
}

/// Optional restriction of a report to one meter and an inclusive date window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportQuery {
    pub meter: Option<String>,
    pub from: Option<Date>,
    pub to: Option<Date>,
}

impl ReportQuery {
    /// Build from textual parameters; blank values count as absent.
    pub fn parse(meter: Option<&str>, from: Option<&str>, to: Option<&str>) -> Result<Self, QueryError> {
        fn date(s: Option<&str>) -> Result<Option<Date>, QueryError> {
            match s.map(str::trim).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => Date::parse(s, format_description!("[year]-[month]-[day]"))
                    .map(Some)
                    .map_err(|_| QueryError::Date(s.to_string())),
            }
        }

        let query = Self {
            meter: meter.map(str::trim).filter(|m| !m.is_empty()).map(str::to_string),
            from: date(from)?,
            to: date(to)?,
        };
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(QueryError::Range { from, to });
            }
        }
        Ok(query)
    }

    pub fn contains(&self, ts: PrimitiveDateTime) -> bool {
        let d = ts.date();
        self.from.map_or(true, |f| d >= f) && self.to.map_or(true, |t| d <= t)
    }

    fn scope(&self) -> ReportScope {
        ReportScope { meter: self.meter.clone(), from: self.from, to: self.to }
    }
}

/// Everything the presentation layer needs from one refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub report: KpiReport,
    pub intervals: Vec<ConsumptionInterval>,
    pub events: Vec<AnomalyEvent>,
}

fn period_of(readings: &[&Reading]) -> ReportPeriod {
    let start = readings.iter().map(|r| r.ts).min();
    let end = readings.iter().map(|r| r.ts).max();
    let data_days = match (start, end) {
        (Some(s), Some(e)) => ((e.date() - s.date()).whole_days() + 1).max(1) as u32,
        _ => 0,
    };
    ReportPeriod { start, end, data_days }
}

/// Run the whole engine over one table snapshot. Pure: the same table,
/// config and query always give the same result.
///
/// Registers are reconciled over each meter's full history; the date window
/// then selects steps by their closing timestamp.
pub fn analyze(table: &RawTable, config: &AnalyticsConfig, query: &ReportQuery) -> Result<Analysis, PipelineError> {
    let normalized = transform::normalize(table)?;

    if let Some(meter) = &query.meter {
        if !normalized.meters.contains_key(meter) {
            return Err(QueryError::UnknownMeter(meter.clone()).into());
        }
    }
    let in_scope = |id: &str| query.meter.as_deref().map_or(true, |m| m == id);

    let mut scoped: BTreeMap<String, Vec<Reading>> = BTreeMap::new();
    let mut allocations = Vec::new();
    let mut quality = DataQuality {
        rows_total: normalized.stats.rows_total,
        rows_dropped: normalized.stats.rows_dropped,
        missing_values: normalized.stats.missing_values,
        timestamp_encoding: normalized.stats.timestamp_encoding,
        readings_without_energy: 0,
        rejected_decreases: 0,
        rejected_implausible_rate: 0,
        resets_detected: 0,
        clamped_sub_meter_kwh: 0.0,
        absent_columns: normalized.columns.absent().into_iter().map(str::to_string).collect(),
    };
    let mut has_energy = false;

    for (meter_id, readings) in normalized.meters.iter().filter(|(id, _)| in_scope(id.as_str())) {
        let mut reconciled = transform::reconcile(meter_id, readings, &config.contract, &config.reconcile);
        reconciled.steps.retain(|s| query.contains(s.end));
        reconciled.rejected.retain(|r| query.contains(r.ts));

        let window: Vec<Reading> = readings.iter().filter(|r| query.contains(r.ts)).cloned().collect();
        quality.readings_without_energy += window.iter().filter(|r| r.cumulative_kwh.is_none()).count();
        quality.rejected_decreases += reconciled.rejected_count(RejectReason::Decrease);
        quality.rejected_implausible_rate += reconciled.rejected_count(RejectReason::ImplausibleRate);
        quality.resets_detected += reconciled
            .accepted
            .iter()
            .filter(|a| a.reset_base && query.contains(a.ts))
            .count();
        has_energy |= window.iter().any(|r| r.cumulative_kwh.is_some());

        allocations.push(transform::allocate_meter(meter_id, &reconciled.steps, &config.tariff));
        scoped.insert(meter_id.clone(), window);
    }

    let site = transform::allocate_site(&allocations, &config.hierarchy, &config.tariff);
    quality.clamped_sub_meter_kwh = site.clamped_kwh;

    let all_readings: Vec<&Reading> = scoped.values().flatten().collect();
    let site_readings: Vec<&Reading> = site
        .meters
        .iter()
        .filter(|m| m.included_in_site_total)
        .filter_map(|m| scoped.get(&m.meter_id))
        .flatten()
        .collect();

    let period = period_of(&all_readings);
    let demand = evaluate::evaluate_demand(&site_readings, &config.contract, &config.load);
    let pf = evaluate::evaluate_power_factor(
        &scoped,
        normalized.columns.current_total,
        &config.power_factor,
        config.sampling_interval_minutes,
    );
    let fire = evaluate::evaluate_fire_risk(&scoped, &config.fire_risk, config.sampling_interval_minutes);
    let unbalance = evaluate::evaluate_unbalance(&all_readings, &config.unbalance);
    let grid = evaluate::evaluate_grid(&all_readings);
    let tod_planner = evaluate::evaluate_tod_planner(&site.daily, &site_readings, &config.tariff, &config.planner);

    let savings = evaluate::estimate_savings(
        &SavingsInputs {
            peak_demand_kw: demand.peak_demand_kw,
            avg_pf: pf.summary.avg_pf,
            energy_kwh: has_energy.then_some(site.total_kwh),
            tod_energy_kwh: site.tod_energy_kwh,
            data_days: period.data_days,
        },
        &config.contract,
        &config.tariff,
        &config.savings,
    );

    let mut events = pf.events;
    events.extend(fire.events);
    events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.meter_id.cmp(&b.meter_id)));

    let intervals: Vec<ConsumptionInterval> = allocations.into_iter().flat_map(|a| a.intervals).collect();

    tracing::info!(
        readings = all_readings.len(),
        meters = scoped.len(),
        total_kwh = site.total_kwh,
        events = events.len(),
        "analysis complete"
    );

    let report = KpiReport {
        snapshot_id: table.fingerprint(),
        scope: query.scope(),
        period,
        total_readings: all_readings.len(),
        carbon_kg: site.total_kwh * config.carbon_kg_per_kwh,
        energy: EnergySummary {
            hierarchy_mode: site.mode,
            total_kwh: site.total_kwh,
            total_cost: site.total_cost,
            tod_energy_kwh: site.tod_energy_kwh,
            tod_cost: site.tod_cost,
            tod_rates: config.tariff.rates,
            weekday_avg_daily_kwh: site.weekday_avg_daily_kwh,
            weekend_avg_daily_kwh: site.weekend_avg_daily_kwh,
            daily: site.daily,
            meters: site.meters,
        },
        demand,
        power_factor: pf.summary,
        unbalance,
        grid,
        fire_risk: fire.summary,
        savings,
        tod_planner,
        data_quality: quality,
    };

    Ok(Analysis { report, intervals, events })
}
