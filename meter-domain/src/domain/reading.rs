use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

use super::{Severity, TodPeriod};

/// One value per phase (R, Y, B). Each phase may be missing independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseValues {
    pub r: Option<f64>,
    pub y: Option<f64>,
    pub b: Option<f64>,
}

impl PhaseValues {
    pub fn new(r: Option<f64>, y: Option<f64>, b: Option<f64>) -> Self {
        Self { r, y, b }
    }

    /// All three phases, or `None` if any is missing.
    pub fn complete(&self) -> Option<[f64; 3]> {
        match (self.r, self.y, self.b) {
            (Some(r), Some(y), Some(b)) => Some([r, y, b]),
            _ => None,
        }
    }
}

/// A single meter sample, as produced by the normalizer.
///
/// Numeric fields are `None` when the source cell was absent, blank,
/// non-numeric or non-finite. `ts` is local wall-clock time of the site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub ts: PrimitiveDateTime,
    pub meter_id: String,
    /// Cumulative energy register, kWh.
    pub cumulative_kwh: Option<f64>,
    pub power_kw: Option<f64>,
    pub apparent_power_kva: Option<f64>,
    pub current_total_a: Option<f64>,
    pub phase_currents_a: PhaseValues,
    pub power_factor: Option<f64>,
    pub voltage_ln_avg: Option<f64>,
    pub voltage_ll_avg: Option<f64>,
    pub phase_voltages: PhaseValues,
    pub neutral_current_a: Option<f64>,
    pub frequency_hz: Option<f64>,
    pub voltage_unbalance_pct: Option<f64>,
    pub current_unbalance_pct: Option<f64>,
    pub load_pct: Option<f64>,
    pub max_demand_kw: Option<f64>,
    /// Equipment run-hour counter.
    pub run_hours: Option<f64>,
    /// ToD period as tagged by the logger at capture time.
    pub tod_tag: Option<TodPeriod>,
    /// Fire risk level as tagged by the logger at capture time.
    pub fire_risk_tag: Option<Severity>,
}

impl Reading {
    /// A reading with only the identifying fields set.
    pub fn empty(meter_id: impl Into<String>, ts: PrimitiveDateTime) -> Self {
        Self {
            ts,
            meter_id: meter_id.into(),
            cumulative_kwh: None,
            power_kw: None,
            apparent_power_kva: None,
            current_total_a: None,
            phase_currents_a: PhaseValues::default(),
            power_factor: None,
            voltage_ln_avg: None,
            voltage_ll_avg: None,
            phase_voltages: PhaseValues::default(),
            neutral_current_a: None,
            frequency_hz: None,
            voltage_unbalance_pct: None,
            current_unbalance_pct: None,
            load_pct: None,
            max_demand_kw: None,
            run_hours: None,
            tod_tag: None,
            fire_risk_tag: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_values_complete_requires_all_three() {
        assert_eq!(
            PhaseValues::new(Some(1.0), Some(2.0), Some(3.0)).complete(),
            Some([1.0, 2.0, 3.0])
        );
        assert_eq!(PhaseValues::new(Some(1.0), None, Some(3.0)).complete(), None);
    }
}
