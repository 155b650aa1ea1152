use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
};

use meter_domain::{Severity, TodValues};
use serde::Deserialize;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid tariff schedule: {0}")]
    Schedule(String),
    #[error("invalid rate for {period}: {value}")]
    Rate { period: &'static str, value: f64 },
    #[error("fire risk thresholds must be strictly ascending (warning < high < critical)")]
    FireThresholds,
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    #[error("meter hierarchy: {0}")]
    Hierarchy(String),
    #[error("load distribution edges must be strictly ascending and non-empty")]
    LoadEdges,
    #[error("ToD planner: {0}")]
    Planner(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8080".to_string() }
    }
}

/// A published Google Sheet; expands into the export URL variants.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    pub sheet_id: String,
    #[serde(default)]
    pub gid: Option<String>,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
}

fn default_sheet_name() -> String {
    "readings".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Local CSV file. Takes precedence over remote settings.
    pub csv_path: Option<String>,
    /// Explicit remote CSV URLs, tried in order.
    pub urls: Vec<String>,
    pub sheet: Option<SheetConfig>,
    pub timeout_secs: u64,
    pub max_attempts: usize,
    pub min_body_bytes: usize,
    pub min_columns: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            csv_path: None,
            urls: Vec::new(),
            sheet: None,
            timeout_secs: 30,
            max_attempts: 3,
            min_body_bytes: 100,
            min_columns: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 15 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

/// Local-hour windows. Hours outside both windows are OFFPEAK.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TodSchedule {
    pub normal_start: u8,
    pub normal_end: u8,
    pub peak_start: u8,
    pub peak_end: u8,
}

impl Default for TodSchedule {
    fn default() -> Self {
        Self { normal_start: 6, normal_end: 17, peak_start: 17, peak_end: 23 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TariffConfig {
    pub rates: TodValues<f64>,
    pub schedule: TodSchedule,
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            rates: TodValues { peak: 8.37, normal: 6.87, offpeak: 5.18 },
            schedule: TodSchedule::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContractConfig {
    pub contracted_kw: f64,
    /// Multiplier on the contract giving the highest plausible average load.
    pub plausibility_headroom: f64,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self { contracted_kw: 200.0, plausibility_headroom: 1.25 }
    }
}

impl ContractConfig {
    pub fn max_plausible_kw(&self) -> f64 {
        self.contracted_kw * self.plausibility_headroom
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub negative_tolerance_kwh: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { negative_tolerance_kwh: 0.01 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PowerFactorConfig {
    /// Readings at or below this total current are ignored for PF.
    pub min_current_a: f64,
    pub low_threshold: f64,
    pub min_consecutive: usize,
    /// Events whose minimum PF falls below this are HIGH instead of WARNING.
    pub severe_threshold: f64,
    pub bands: Vec<f64>,
}

impl Default for PowerFactorConfig {
    fn default() -> Self {
        Self {
            min_current_a: 1.0,
            low_threshold: 0.90,
            min_consecutive: 2,
            severe_threshold: 0.85,
            bands: vec![0.92, 0.90, 0.85],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FireRiskConfig {
    pub warning_a: f64,
    pub high_a: f64,
    pub critical_a: f64,
    pub event_min_tier: Severity,
}

impl Default for FireRiskConfig {
    fn default() -> Self {
        Self { warning_a: 2.0, high_a: 5.0, critical_a: 10.0, event_min_tier: Severity::High }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnbalanceConfig {
    pub voltage_warning_pct: f64,
    pub current_warning_pct: f64,
}

impl Default for UnbalanceConfig {
    fn default() -> Self {
        Self { voltage_warning_pct: 2.0, current_warning_pct: 10.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub idle_threshold_pct: f64,
    /// Upper edges of the utilisation buckets; the last bucket is open-ended.
    pub distribution_edges_pct: Vec<f64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { idle_threshold_pct: 10.0, distribution_edges_pct: vec![10.0, 25.0, 50.0, 75.0] }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Share of energy per period the site should aim for. Sums to 1.
    pub target_split: TodValues<f64>,
    /// Quantile of positive kW per period reported as its baseline load.
    pub baseline_quantile: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            target_split: TodValues { peak: 0.10, normal: 0.45, offpeak: 0.45 },
            baseline_quantile: 0.10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SavingsConfig {
    pub demand_charge_per_kva_month: f64,
    /// Recommended contract = observed peak × buffer.
    pub contract_buffer: f64,
    /// Downsizing is suggested only below contract × trigger.
    pub downsize_trigger: f64,
    pub kva_conversion_pf: f64,
    pub pf_benchmark: f64,
    pub blended_rate: f64,
    pub shiftable_fraction: f64,
    pub realization_factor: f64,
    pub min_line_item: f64,
    pub days_per_month: f64,
}

impl Default for SavingsConfig {
    fn default() -> Self {
        Self {
            demand_charge_per_kva_month: 350.0,
            contract_buffer: 1.2,
            downsize_trigger: 0.8,
            kva_conversion_pf: 0.9,
            pf_benchmark: 0.92,
            blended_rate: 6.50,
            shiftable_fraction: 0.5,
            realization_factor: 0.5,
            min_line_item: 100.0,
            days_per_month: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubMeterLink {
    pub meter: String,
    pub parent: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    pub sub_meters: Vec<SubMeterLink>,
}

impl HierarchyConfig {
    pub fn is_configured(&self) -> bool {
        !self.sub_meters.is_empty()
    }

    /// sub-meter -> parent
    pub fn parents(&self) -> BTreeMap<&str, &str> {
        self.sub_meters
            .iter()
            .map(|l| (l.meter.as_str(), l.parent.as_str()))
            .collect()
    }
}

/// Every tunable the engine uses. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub tariff: TariffConfig,
    pub contract: ContractConfig,
    pub reconcile: ReconcileConfig,
    pub power_factor: PowerFactorConfig,
    pub fire_risk: FireRiskConfig,
    pub unbalance: UnbalanceConfig,
    pub load: LoadConfig,
    pub savings: SavingsConfig,
    pub planner: PlannerConfig,
    pub hierarchy: HierarchyConfig,
    pub sampling_interval_minutes: f64,
    pub carbon_kg_per_kwh: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            tariff: TariffConfig::default(),
            contract: ContractConfig::default(),
            reconcile: ReconcileConfig::default(),
            power_factor: PowerFactorConfig::default(),
            fire_risk: FireRiskConfig::default(),
            unbalance: UnbalanceConfig::default(),
            load: LoadConfig::default(),
            savings: SavingsConfig::default(),
            planner: PlannerConfig::default(),
            hierarchy: HierarchyConfig::default(),
            sampling_interval_minutes: 5.0,
            carbon_kg_per_kwh: 0.85,
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.tariff.schedule;
        for (name, h) in [
            ("normal_start", s.normal_start),
            ("normal_end", s.normal_end),
            ("peak_start", s.peak_start),
            ("peak_end", s.peak_end),
        ] {
            if h > 24 {
                return Err(ConfigError::Schedule(format!("{name} = {h} is not an hour of day")));
            }
        }
        if s.normal_start > s.normal_end || s.peak_start > s.peak_end {
            return Err(ConfigError::Schedule("window end precedes its start".to_string()));
        }
        if s.normal_start < s.peak_end && s.peak_start < s.normal_end {
            return Err(ConfigError::Schedule("NORMAL and PEAK windows overlap".to_string()));
        }

        let rates = &self.tariff.rates;
        for (period, value) in [("PEAK", rates.peak), ("NORMAL", rates.normal), ("OFFPEAK", rates.offpeak)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Rate { period, value });
            }
        }

        let f = &self.fire_risk;
        if !(f.warning_a < f.high_a && f.high_a < f.critical_a) {
            return Err(ConfigError::FireThresholds);
        }

        if self.contract.contracted_kw <= 0.0 {
            return Err(ConfigError::NonPositive("contract.contracted_kw"));
        }
        if self.contract.plausibility_headroom <= 0.0 {
            return Err(ConfigError::NonPositive("contract.plausibility_headroom"));
        }
        if self.sampling_interval_minutes <= 0.0 {
            return Err(ConfigError::NonPositive("sampling_interval_minutes"));
        }
        if self.power_factor.min_consecutive == 0 {
            return Err(ConfigError::NonPositive("power_factor.min_consecutive"));
        }
        if self.savings.kva_conversion_pf <= 0.0 {
            return Err(ConfigError::NonPositive("savings.kva_conversion_pf"));
        }

        let edges = &self.load.distribution_edges_pct;
        if edges.is_empty() || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::LoadEdges);
        }

        let p = &self.planner;
        let split = p.target_split;
        if [split.peak, split.normal, split.offpeak].iter().any(|v| !(0.0..=1.0).contains(v))
            || (split.total() - 1.0).abs() > 1e-6
        {
            return Err(ConfigError::Planner("target_split shares must lie in 0..=1 and sum to 1".to_string()));
        }
        if !(0.0..=1.0).contains(&p.baseline_quantile) {
            return Err(ConfigError::Planner(format!("baseline_quantile {} is outside 0..=1", p.baseline_quantile)));
        }

        self.validate_hierarchy()
    }

    fn validate_hierarchy(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for link in &self.hierarchy.sub_meters {
            if link.meter == link.parent {
                return Err(ConfigError::Hierarchy(format!("{} is its own parent", link.meter)));
            }
            if !seen.insert(link.meter.as_str()) {
                return Err(ConfigError::Hierarchy(format!("{} has more than one parent", link.meter)));
            }
        }

        let parents = self.hierarchy.parents();
        for start in parents.keys() {
            let mut cursor = *start;
            let mut steps = 0;
            while let Some(&parent) = parents.get(cursor) {
                cursor = parent;
                steps += 1;
                if cursor == *start || steps > parents.len() {
                    return Err(ConfigError::Hierarchy(format!("cycle through {start}")));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub cache: CacheConfig,
    pub metrics: Option<MetricsConfig>,
    pub analytics: AnalyticsConfig,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("METER_ANALYTICS_CONFIG").unwrap_or_else(|_| "meter-analytics.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.analytics.validate()?;
        Ok(cfg)
    }
}
