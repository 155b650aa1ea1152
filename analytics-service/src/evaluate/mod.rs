//! Anomaly detection, electrical KPIs and the savings estimate.
//!
//! Every evaluator degrades per metric: an absent column yields `None` (or a
//! `MissingInput` savings line), never an error.

pub mod electrical;
pub mod fire_risk;
pub mod planner;
pub mod power_factor;
pub mod savings;

use std::ops::Range;

pub use electrical::{evaluate_demand, evaluate_grid, evaluate_unbalance};
pub use fire_risk::{evaluate_fire_risk, FireRiskOutcome, NeutralSource};
pub use planner::evaluate_tod_planner;
pub use power_factor::{evaluate_power_factor, PowerFactorOutcome};
pub use savings::{estimate_savings, SavingsInputs};

/// min / max / mean over a set of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Spread {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl Spread {
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| Self { count, min, max, mean: sum / count as f64 })
    }
}

/// Maximal runs of consecutive items matching `pred`, as index ranges.
pub(crate) fn runs<T>(items: &[T], pred: impl Fn(&T) -> bool) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < items.len() {
        if !pred(&items[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < items.len() && pred(&items[i]) {
            i += 1;
        }
        out.push(start..i);
    }
    out
}

/// `part / whole` as a percentage; zero when `whole` is zero.
pub(crate) fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
