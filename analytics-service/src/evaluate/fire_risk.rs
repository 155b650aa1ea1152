use std::collections::BTreeMap;

use meter_domain::{
    AnomalyEvent, AnomalyMetric, FireRiskSummary, NeutralSources, Reading, Severity, SeverityCounts,
};

use super::{pct, runs, Spread};
use crate::config::FireRiskConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeutralSource {
    Measured,
    /// Computed from the three phase currents.
    Derived,
    /// No current available; the logger's own risk tag was used.
    Tagged,
}

impl FireRiskConfig {
    /// Tier of a neutral current. A value on a threshold belongs to the higher tier.
    pub fn classify(&self, neutral_a: f64) -> Severity {
        if neutral_a >= self.critical_a {
            Severity::Critical
        } else if neutral_a >= self.high_a {
            Severity::High
        } else if neutral_a >= self.warning_a {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

/// Neutral current of a balanced-impedance three-phase system from its phase currents.
///
/// `I_N = sqrt(R² + Y² + B² − RY − YB − BR)`, on absolute phase values.
pub fn derive_neutral(phases: [f64; 3]) -> f64 {
    let [r, y, b] = phases.map(f64::abs);
    (r * r + y * y + b * b - r * y - y * b - b * r).max(0.0).sqrt()
}

/// One classified sample.
#[derive(Debug, Clone, Copy)]
struct Sample<'a> {
    reading: &'a Reading,
    tier: Severity,
    neutral_a: Option<f64>,
}

fn classify_reading<'a>(r: &'a Reading, cfg: &FireRiskConfig) -> Option<(Sample<'a>, NeutralSource)> {
    let measured = r.neutral_current_a.map(|a| (a.abs(), NeutralSource::Measured));
    let derived = || r.phase_currents_a.complete().map(|p| (derive_neutral(p), NeutralSource::Derived));

    if let Some((a, source)) = measured.or_else(derived) {
        return Some((Sample { reading: r, tier: cfg.classify(a), neutral_a: Some(a) }, source));
    }
    r.fire_risk_tag
        .map(|tier| (Sample { reading: r, tier, neutral_a: None }, NeutralSource::Tagged))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FireRiskOutcome {
    pub summary: FireRiskSummary,
    pub events: Vec<AnomalyEvent>,
}

/// Per-sample fire risk tiers plus runs at or above `event_min_tier`.
///
/// Unlike power factor there is no minimum run length: a single sample at a
/// risky tier is already an event.
pub fn evaluate_fire_risk(
    meters: &BTreeMap<String, Vec<Reading>>,
    cfg: &FireRiskConfig,
    sampling_interval_minutes: f64,
) -> FireRiskOutcome {
    let mut counts = SeverityCounts::<usize>::default();
    let mut sources = NeutralSources::default();
    let mut currents = Vec::new();
    let mut events = Vec::new();

    for (meter_id, readings) in meters {
        let mut samples: Vec<Option<Sample<'_>>> = Vec::with_capacity(readings.len());
        for r in readings {
            match classify_reading(r, cfg) {
                Some((sample, source)) => {
                    *counts.get_mut(sample.tier) += 1;
                    match source {
                        NeutralSource::Measured => sources.measured += 1,
                        NeutralSource::Derived => sources.derived += 1,
                        NeutralSource::Tagged => sources.tagged += 1,
                    }
                    currents.extend(sample.neutral_a);
                    samples.push(Some(sample));
                }
                None => {
                    sources.unclassified += 1;
                    samples.push(None);
                }
            }
        }

        let risky = |s: &Option<Sample<'_>>| s.map_or(false, |s| s.tier >= cfg.event_min_tier);
        for run in runs(&samples, risky) {
            let run: Vec<Sample<'_>> = samples[run].iter().flatten().copied().collect();
            let (Some(first), Some(last)) = (run.first(), run.last()) else { continue };
            let spread = Spread::of(run.iter().filter_map(|s| s.neutral_a));
            events.push(AnomalyEvent {
                meter_id: meter_id.clone(),
                metric: AnomalyMetric::NeutralCurrent,
                severity: run.iter().map(|s| s.tier).max().unwrap_or(cfg.event_min_tier),
                start: first.reading.ts,
                end: last.reading.ts,
                sample_count: run.len(),
                duration_minutes: run.len() as f64 * sampling_interval_minutes,
                min_value: spread.map(|s| s.min),
                max_value: spread.map(|s| s.max),
                avg_value: spread.map(|s| s.mean),
            });
        }
    }

    let classified: usize = Severity::ALL.iter().map(|t| counts.get(*t)).sum();
    let mut percentages = SeverityCounts::<f64>::default();
    for tier in Severity::ALL {
        *percentages.get_mut(tier) = pct(counts.get(tier), classified);
    }
    let spread = Spread::of(currents.iter().copied());

    if counts.high + counts.critical > 0 {
        tracing::warn!(high = counts.high, critical = counts.critical, "elevated neutral current samples");
    }

    FireRiskOutcome {
        summary: FireRiskSummary {
            classified_readings: classified,
            counts,
            percentages,
            neutral_avg_a: spread.map(|s| s.mean),
            neutral_max_a: spread.map(|s| s.max),
            sources,
            events: events.len(),
        },
        events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_domain::PhaseValues;
    use time::{macros::datetime, Duration};

    fn readings(neutral: &[Option<f64>]) -> BTreeMap<String, Vec<Reading>> {
        let start = datetime!(2024-06-10 10:00);
        let rs = neutral
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let mut r = Reading::empty("Shed_01", start + Duration::minutes(5 * i as i64));
                r.neutral_current_a = *n;
                r
            })
            .collect();
        BTreeMap::from([("Shed_01".to_string(), rs)])
    }

    #[test]
    fn boundary_values_go_to_the_higher_tier() {
        let cfg = FireRiskConfig::default();
        assert_eq!(cfg.classify(1.999), Severity::Normal);
        assert_eq!(cfg.classify(2.0), Severity::Warning);
        assert_eq!(cfg.classify(4.999), Severity::Warning);
        assert_eq!(cfg.classify(5.0), Severity::High);
        assert_eq!(cfg.classify(10.0), Severity::Critical);
    }

    #[test]
    fn derived_neutral_matches_phasor_identity() {
        assert_eq!(derive_neutral([10.0, 10.0, 10.0]), 0.0);
        assert_eq!(derive_neutral([10.0, 0.0, 0.0]), 10.0);
        assert_eq!(derive_neutral([-10.0, 0.0, 0.0]), 10.0);
        assert!((derive_neutral([12.0, 10.0, 8.0]) - 12.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn source_priority_is_measured_then_derived_then_tag() {
        let t = datetime!(2024-06-10 10:00);
        let cfg = FireRiskConfig::default();

        let mut r = Reading::empty("m", t);
        r.neutral_current_a = Some(1.0);
        r.phase_currents_a = PhaseValues::new(Some(30.0), Some(0.0), Some(0.0));
        r.fire_risk_tag = Some(Severity::Critical);
        let (s, src) = classify_reading(&r, &cfg).unwrap();
        assert_eq!((s.tier, src), (Severity::Normal, NeutralSource::Measured));

        r.neutral_current_a = None;
        let (s, src) = classify_reading(&r, &cfg).unwrap();
        assert_eq!((s.tier, src), (Severity::Critical, NeutralSource::Derived));

        r.phase_currents_a = PhaseValues::new(Some(30.0), None, Some(0.0));
        let (s, src) = classify_reading(&r, &cfg).unwrap();
        assert_eq!((s.tier, src), (Severity::Critical, NeutralSource::Tagged));
        assert_eq!(s.neutral_a, None);

        r.fire_risk_tag = None;
        assert!(classify_reading(&r, &cfg).is_none());
    }

    #[test]
    fn counts_percentages_and_events() {
        let out = evaluate_fire_risk(
            &readings(&[Some(0.5), Some(5.0), Some(12.0), Some(1.0), Some(6.0), None]),
            &FireRiskConfig::default(),
            5.0,
        );
        let s = &out.summary;

        assert_eq!(s.classified_readings, 5);
        assert_eq!((s.counts.normal, s.counts.high, s.counts.critical), (2, 2, 1));
        assert_eq!(s.percentages.normal, 40.0);
        assert_eq!(s.sources.unclassified, 1);
        assert_eq!(s.neutral_max_a, Some(12.0));

        assert_eq!(out.events.len(), 2);
        assert_eq!(out.events[0].severity, Severity::Critical);
        assert_eq!(out.events[0].sample_count, 2);
        assert_eq!(out.events[1].sample_count, 1);
        assert_eq!(out.events[1].start, datetime!(2024-06-10 10:20));
    }
}
