//! The KPI report handed to the presentation layer.
//!
//! Scalars that depend on an optional source column are `Option`: `None`
//! means "column absent or no usable samples", which is distinct from a
//! measured zero.

use serde::{Deserialize, Serialize};
use time::{Date, PrimitiveDateTime};

use super::{DailyTodTotal, Severity, TodValues};

pub const SAVINGS_LABEL: &str = "Conservative estimate, not a guarantee";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    /// BLAKE3 digest of the raw input snapshot.
    pub snapshot_id: String,
    pub scope: ReportScope,
    pub period: ReportPeriod,
    pub total_readings: usize,
    pub energy: EnergySummary,
    pub demand: DemandSummary,
    pub power_factor: PowerFactorSummary,
    pub unbalance: UnbalanceSummary,
    pub grid: GridSummary,
    pub fire_risk: FireRiskSummary,
    pub savings: SavingsEstimate,
    pub tod_planner: TodPlanner,
    pub carbon_kg: f64,
    pub data_quality: DataQuality,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportScope {
    pub meter: Option<String>,
    pub from: Option<Date>,
    pub to: Option<Date>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: Option<PrimitiveDateTime>,
    pub end: Option<PrimitiveDateTime>,
    /// Calendar days spanned, inclusive. Zero when there are no readings.
    pub data_days: u32,
}

/// How the site total was formed from the available meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyMode {
    /// Site total uses main meters only; sub-meters are a breakdown.
    Deduplicated,
    /// No hierarchy configured: every meter is summed into the site total.
    Independent,
    SingleMeter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MeterRole {
    Main,
    Sub { parent: String },
    Independent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterEnergy {
    pub meter_id: String,
    #[serde(flatten)]
    pub role: MeterRole,
    pub included_in_site_total: bool,
    pub energy_kwh: f64,
    pub cost: f64,
    pub tod_energy_kwh: TodValues<f64>,
    /// Energy removed because it exceeded the parent meter's bucket.
    pub clamped_kwh: f64,
    /// Main meters with sub-meters only: main minus the sum of its subs.
    pub other_loads_kwh: Option<f64>,
    pub share_of_site_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergySummary {
    pub hierarchy_mode: HierarchyMode,
    pub total_kwh: f64,
    pub total_cost: f64,
    pub tod_energy_kwh: TodValues<f64>,
    pub tod_cost: TodValues<f64>,
    pub tod_rates: TodValues<f64>,
    pub daily: Vec<DailyTodTotal>,
    pub weekday_avg_daily_kwh: Option<f64>,
    pub weekend_avg_daily_kwh: Option<f64>,
    pub meters: Vec<MeterEnergy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandSummary {
    pub contracted_kw: f64,
    pub peak_demand_kw: Option<f64>,
    pub max_demand_recorded_kw: Option<f64>,
    pub load_avg_pct: Option<f64>,
    pub load_max_pct: Option<f64>,
    pub idle_time_pct: Option<f64>,
    /// Empty when no load figure is available.
    pub load_distribution: Vec<LoadBucket>,
    pub apparent_power_max_kva: Option<f64>,
    /// Highest run-hour counter value seen.
    pub run_hours: Option<f64>,
}

/// Share of load samples in `(lower_pct, upper_pct]`. Open bounds are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBucket {
    pub lower_pct: Option<f64>,
    pub upper_pct: Option<f64>,
    pub share_pct: f64,
}

impl LoadBucket {
    pub fn label(&self) -> String {
        match (self.lower_pct, self.upper_pct) {
            (None, Some(u)) => format!("<= {u}%"),
            (Some(l), Some(u)) => format!("{l}-{u}%"),
            (Some(l), None) => format!("> {l}%"),
            (None, None) => "all".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PfBand {
    pub threshold: f64,
    pub pct_below: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerFactorSummary {
    pub valid_readings: usize,
    pub avg_pf: Option<f64>,
    pub min_pf: Option<f64>,
    pub bands: Vec<PfBand>,
    pub sustained_alerts: usize,
    pub sustained_readings: usize,
    pub sustained_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnbalanceStats {
    pub avg_pct: Option<f64>,
    pub max_pct: Option<f64>,
    pub warning_threshold_pct: f64,
    pub warning_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnbalanceSummary {
    pub voltage: UnbalanceStats,
    pub current: UnbalanceStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    pub frequency_min_hz: Option<f64>,
    pub frequency_max_hz: Option<f64>,
    pub vll_min: Option<f64>,
    pub vll_max: Option<f64>,
    pub vln_min: Option<f64>,
    pub vln_max: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityCounts<T> {
    pub normal: T,
    pub warning: T,
    pub high: T,
    pub critical: T,
}

impl<T: Copy> SeverityCounts<T> {
    pub fn get(&self, tier: Severity) -> T {
        match tier {
            Severity::Normal => self.normal,
            Severity::Warning => self.warning,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }

    pub fn get_mut(&mut self, tier: Severity) -> &mut T {
        match tier {
            Severity::Normal => &mut self.normal,
            Severity::Warning => &mut self.warning,
            Severity::High => &mut self.high,
            Severity::Critical => &mut self.critical,
        }
    }
}

/// Where each sample's neutral current came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeutralSources {
    pub measured: usize,
    pub derived: usize,
    pub tagged: usize,
    pub unclassified: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireRiskSummary {
    pub classified_readings: usize,
    pub counts: SeverityCounts<usize>,
    pub percentages: SeverityCounts<f64>,
    pub neutral_avg_a: Option<f64>,
    pub neutral_max_a: Option<f64>,
    pub sources: NeutralSources,
    pub events: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavingsKind {
    DemandContract,
    PowerFactorPenalty,
    TodShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavingsStatus {
    Applied,
    /// Opportunity exists but is below the reporting minimum.
    BelowMinimum,
    /// Inputs present, no opportunity.
    NotApplicable,
    MissingInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsLine {
    pub kind: SavingsKind,
    pub status: SavingsStatus,
    /// Monthly amount; only counted into the total when `Applied`.
    pub monthly_amount: f64,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsEstimate {
    pub label: String,
    pub line_items: Vec<SavingsLine>,
    pub gross_monthly: f64,
    pub realization_factor: f64,
    pub realizable_monthly: f64,
    pub period_days: u32,
    pub period_amount: f64,
    pub annual_amount: f64,
}

/// Site ToD energy for one ISO week (`2024-W24`) or month (`2024-06`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodRollup {
    pub label: String,
    pub energy_kwh: TodValues<f64>,
    pub cost: TodValues<f64>,
}

/// Actual ToD split of one roll-up against the target split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodTargetComparison {
    pub label: String,
    pub total_kwh: f64,
    pub actual_pct: TodValues<f64>,
    pub actual_cost: f64,
    pub target_energy_kwh: TodValues<f64>,
    pub target_cost: f64,
    /// Actual minus target cost; negative when already cheaper than target.
    pub savings: f64,
    pub shift_from_peak_kwh: f64,
    /// OFFPEAK share at or above target and PEAK share at or below it.
    pub already_optimal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodPlanner {
    pub target_split: TodValues<f64>,
    pub weekly: Vec<TodRollup>,
    pub monthly: Vec<TodRollup>,
    pub latest_week: Option<TodTargetComparison>,
    pub latest_month: Option<TodTargetComparison>,
    /// Low-quantile positive kW per period.
    pub kw_baselines: TodValues<Option<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampEncoding {
    Text,
    /// Spreadsheet serial day numbers were used as a fallback.
    SerialDays,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub rows_total: usize,
    pub rows_dropped: usize,
    pub missing_values: usize,
    pub timestamp_encoding: TimestampEncoding,
    pub readings_without_energy: usize,
    pub rejected_decreases: usize,
    pub rejected_implausible_rate: usize,
    pub resets_detected: usize,
    pub clamped_sub_meter_kwh: f64,
    /// Optional source columns that were not present.
    pub absent_columns: Vec<String>,
}
