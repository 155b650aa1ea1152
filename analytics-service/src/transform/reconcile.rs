//! Cumulative energy registers -> accepted consumption steps.
//!
//! The walk keeps a "last accepted" register value. A reading is accepted when
//! it does not go backwards (beyond a small tolerance) and the average power it
//! implies stays under the plausible maximum. Everything else is rejected
//! without moving the last accepted value, so one bad sample never poisons the
//! rest of the series.

use meter_domain::{Reading, TodPeriod};
use time::PrimitiveDateTime;

use crate::{
    config::{ContractConfig, ReconcileConfig},
    observability::counters,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Decrease,
    ImplausibleRate,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decrease => "decrease",
            Self::ImplausibleRate => "implausible_rate",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedReading {
    pub ts: PrimitiveDateTime,
    /// Register value as read from the meter.
    pub raw_kwh: f64,
    /// Seed plus every accepted delta so far; never decreases across resets.
    pub continuous_kwh: f64,
    /// This reading re-seeded the walk after a confirmed register reset.
    pub reset_base: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedReading {
    pub ts: PrimitiveDateTime,
    pub raw_kwh: f64,
    pub reason: RejectReason,
}

/// Positive consumption between two consecutive accepted readings.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyStep {
    pub start: PrimitiveDateTime,
    pub end: PrimitiveDateTime,
    pub delta_kwh: f64,
    /// ToD tag carried by the closing reading, if any.
    pub closing_tod_tag: Option<TodPeriod>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledMeter {
    pub meter_id: String,
    pub accepted: Vec<AcceptedReading>,
    pub steps: Vec<EnergyStep>,
    pub rejected: Vec<RejectedReading>,
    pub resets: usize,
    pub readings_without_energy: usize,
}

impl ReconciledMeter {
    fn empty(meter_id: &str) -> Self {
        Self {
            meter_id: meter_id.to_string(),
            accepted: Vec::new(),
            steps: Vec::new(),
            rejected: Vec::new(),
            resets: 0,
            readings_without_energy: 0,
        }
    }

    pub fn total_kwh(&self) -> f64 {
        self.steps.iter().map(|s| s.delta_kwh).sum()
    }

    /// Consumption of steps closing within `[start, end)`. Zero if none.
    pub fn consumption_between(&self, start: PrimitiveDateTime, end: PrimitiveDateTime) -> f64 {
        self.steps
            .iter()
            .filter(|s| s.end >= start && s.end < end)
            .map(|s| s.delta_kwh)
            .sum()
    }

    pub fn rejected_count(&self, reason: RejectReason) -> usize {
        self.rejected.iter().filter(|r| r.reason == reason).count()
    }
}

type Sample = (PrimitiveDateTime, f64);

struct Walk {
    max_kw: f64,
    eps: f64,
    out: ReconciledMeter,
    last: Option<Sample>,
    /// A decrease waiting for the next reading to tell reset from glitch.
    candidate: Option<Sample>,
    register: f64,
}

impl Walk {
    fn plausible(&self, from: Sample, to: Sample) -> bool {
        let delta = to.1 - from.1;
        let hours = (to.0 - from.0).as_seconds_f64() / 3600.0;
        if hours <= 0.0 {
            return delta <= self.eps;
        }
        delta / hours <= self.max_kw
    }

    /// Start (or restart after a reset) the walk at `sample`.
    fn seed(&mut self, sample: Sample, reset_base: bool) {
        if !reset_base {
            self.register = sample.1;
        }
        self.out.accepted.push(AcceptedReading {
            ts: sample.0,
            raw_kwh: sample.1,
            continuous_kwh: self.register,
            reset_base,
        });
        self.last = Some(sample);
    }

    fn accrue(&mut self, from: Sample, to: Sample, tag: Option<TodPeriod>) {
        // Deltas inside the negative tolerance count as zero.
        let delta = (to.1 - from.1).max(0.0);
        if delta > 0.0 {
            self.register += delta;
            self.out.steps.push(EnergyStep { start: from.0, end: to.0, delta_kwh: delta, closing_tod_tag: tag });
        }
        self.out.accepted.push(AcceptedReading {
            ts: to.0,
            raw_kwh: to.1,
            continuous_kwh: self.register,
            reset_base: false,
        });
        self.last = Some(to);
    }

    fn reject(&mut self, sample: Sample, reason: RejectReason) {
        metrics::counter!(counters::READINGS_REJECTED, "reason" => reason.as_str()).increment(1);
        self.out.rejected.push(RejectedReading { ts: sample.0, raw_kwh: sample.1, reason });
    }

    fn step(&mut self, current: Sample, tag: Option<TodPeriod>) {
        let Some(last) = self.last else {
            self.seed(current, false);
            return;
        };

        if let Some(candidate) = self.candidate.take() {
            let below_last = current.1 < last.1 - self.eps;
            let follows_candidate = current.1 - candidate.1 >= -self.eps && self.plausible(candidate, current);
            if below_last && follows_candidate {
                self.out.resets += 1;
                tracing::info!(
                    meter = %self.out.meter_id,
                    at = %candidate.0,
                    from_kwh = last.1,
                    to_kwh = candidate.1,
                    "register reset confirmed"
                );
                self.seed(candidate, true);
                self.accrue(candidate, current, tag);
                return;
            }
            self.reject(candidate, RejectReason::Decrease);
        }

        if current.1 - last.1 < -self.eps {
            self.candidate = Some(current);
        } else if !self.plausible(last, current) {
            self.reject(current, RejectReason::ImplausibleRate);
        } else {
            self.accrue(last, current, tag);
        }
    }
}

/// Reconcile one meter's chronologically ordered readings.
///
/// Readings without a register value are skipped and counted.
pub fn reconcile(
    meter_id: &str,
    readings: &[Reading],
    contract: &ContractConfig,
    cfg: &ReconcileConfig,
) -> ReconciledMeter {
    let mut walk = Walk {
        max_kw: contract.max_plausible_kw(),
        eps: cfg.negative_tolerance_kwh,
        out: ReconciledMeter::empty(meter_id),
        last: None,
        candidate: None,
        register: 0.0,
    };

    for r in readings {
        match r.cumulative_kwh {
            Some(kwh) => walk.step((r.ts, kwh), r.tod_tag),
            None => walk.out.readings_without_energy += 1,
        }
    }
    if let Some(candidate) = walk.candidate.take() {
        walk.reject(candidate, RejectReason::Decrease);
    }

    let out = walk.out;
    if !out.rejected.is_empty() || out.resets > 0 {
        tracing::debug!(
            meter = meter_id,
            rejected = out.rejected.len(),
            resets = out.resets,
            "reconciled register with exclusions"
        );
    }
    out
}
