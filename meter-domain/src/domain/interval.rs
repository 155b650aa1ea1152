use serde::{Deserialize, Serialize};
use time::{Date, PrimitiveDateTime};

use super::{DayType, TodPeriod, TodValues};

/// Energy accrued by one meter between two accepted register readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionInterval {
    pub meter_id: String,
    pub period_start: PrimitiveDateTime,
    pub period_end: PrimitiveDateTime,
    pub tod_period: TodPeriod,
    pub energy_kwh: f64,
    pub cost: f64,
}

/// Per-day, per-period totals for one meter (or for the site).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTodTotal {
    pub date: Date,
    pub day_type: DayType,
    pub energy_kwh: TodValues<f64>,
    pub cost: TodValues<f64>,
}

impl DailyTodTotal {
    pub fn new(date: Date) -> Self {
        Self {
            date,
            day_type: DayType::of(date),
            energy_kwh: TodValues::default(),
            cost: TodValues::default(),
        }
    }

    pub fn total_energy_kwh(&self) -> f64 {
        self.energy_kwh.total()
    }

    pub fn total_cost(&self) -> f64 {
        self.cost.total()
    }
}
