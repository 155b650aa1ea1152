use std::collections::BTreeMap;

use meter_domain::{AnomalyEvent, AnomalyMetric, PfBand, PowerFactorSummary, Reading, Severity};

use super::{pct, runs, Spread};
use crate::config::PowerFactorConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct PowerFactorOutcome {
    pub summary: PowerFactorSummary,
    pub events: Vec<AnomalyEvent>,
}

/// Whether a reading counts towards PF statistics and alerts.
///
/// Light-load samples are excluded: PF is naturally poor at start-up and is
/// not billed there. Without a current column every PF sample is eligible.
fn eligible(r: &Reading, has_current: bool, cfg: &PowerFactorConfig) -> Option<f64> {
    let pf = r.power_factor?.abs();
    if !has_current {
        return Some(pf);
    }
    match r.current_total_a {
        Some(a) if a > cfg.min_current_a => Some(pf),
        _ => None,
    }
}

/// Sustained low-PF events and PF statistics over all meters.
///
/// Runs are formed over each meter's eligible samples in time order; a run
/// becomes an event only once it reaches `min_consecutive` samples.
pub fn evaluate_power_factor(
    meters: &BTreeMap<String, Vec<Reading>>,
    has_current: bool,
    cfg: &PowerFactorConfig,
    sampling_interval_minutes: f64,
) -> PowerFactorOutcome {
    let mut eligible_pf = Vec::new();
    let mut events = Vec::new();

    for (meter_id, readings) in meters {
        let samples: Vec<(&Reading, f64)> = readings
            .iter()
            .filter_map(|r| eligible(r, has_current, cfg).map(|pf| (r, pf)))
            .collect();
        eligible_pf.extend(samples.iter().map(|(_, pf)| *pf));

        for run in runs(&samples, |(_, pf)| *pf < cfg.low_threshold) {
            let run = &samples[run];
            if run.len() < cfg.min_consecutive {
                continue;
            }
            let Some(spread) = Spread::of(run.iter().map(|(_, pf)| *pf)) else { continue };
            let severity = if spread.min < cfg.severe_threshold { Severity::High } else { Severity::Warning };
            events.push(AnomalyEvent {
                meter_id: meter_id.clone(),
                metric: AnomalyMetric::PowerFactor,
                severity,
                start: run[0].0.ts,
                end: run[run.len() - 1].0.ts,
                sample_count: run.len(),
                duration_minutes: run.len() as f64 * sampling_interval_minutes,
                min_value: Some(spread.min),
                max_value: Some(spread.max),
                avg_value: Some(spread.mean),
            });
        }
    }

    let stats = Spread::of(eligible_pf.iter().copied()).or_else(|| {
        Spread::of(meters.values().flatten().filter_map(|r| r.power_factor.map(f64::abs)))
    });
    let bands = if eligible_pf.is_empty() {
        Vec::new()
    } else {
        cfg.bands
            .iter()
            .map(|&threshold| PfBand {
                threshold,
                pct_below: pct(eligible_pf.iter().filter(|pf| **pf < threshold).count(), eligible_pf.len()),
            })
            .collect()
    };

    if !events.is_empty() {
        tracing::info!(events = events.len(), "sustained low power factor detected");
    }

    PowerFactorOutcome {
        summary: PowerFactorSummary {
            valid_readings: eligible_pf.len(),
            avg_pf: stats.map(|s| s.mean),
            min_pf: stats.map(|s| s.min),
            bands,
            sustained_alerts: events.len(),
            sustained_readings: events.iter().map(|e| e.sample_count).sum(),
            sustained_minutes: events.iter().map(|e| e.duration_minutes).sum(),
        },
        events,
    }
}
