//! Demand, load utilisation, phase unbalance and grid-side ranges.

use meter_domain::{DemandSummary, GridSummary, LoadBucket, Reading, UnbalanceStats, UnbalanceSummary};

use super::{pct, Spread};
use crate::config::{ContractConfig, LoadConfig, UnbalanceConfig};

fn max_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
}

/// Share of `loads` falling in each band cut at `edges`: `<= first`, then
/// `(lo, hi]`, then `> last`. Empty input yields no buckets.
pub fn load_distribution(loads: &[f64], edges: &[f64]) -> Vec<LoadBucket> {
    if loads.is_empty() || edges.is_empty() {
        return Vec::new();
    }
    let mut counts = vec![0usize; edges.len() + 1];
    for l in loads {
        let idx = edges.iter().position(|edge| l <= edge).unwrap_or(edges.len());
        counts[idx] += 1;
    }
    counts
        .iter()
        .enumerate()
        .map(|(i, n)| LoadBucket {
            lower_pct: i.checked_sub(1).map(|j| edges[j]),
            upper_pct: edges.get(i).copied(),
            share_pct: pct(*n, loads.len()),
        })
        .collect()
}

/// Demand and load figures over the readings that make up the site total.
pub fn evaluate_demand(site: &[&Reading], contract: &ContractConfig, load: &LoadConfig) -> DemandSummary {
    let loads: Vec<f64> = site
        .iter()
        .filter_map(|r| {
            r.load_pct
                .or_else(|| r.power_kw.map(|kw| kw / contract.contracted_kw * 100.0))
        })
        .collect();
    let load_spread = Spread::of(loads.iter().copied());
    let idle = loads.iter().filter(|l| **l < load.idle_threshold_pct).count();

    DemandSummary {
        contracted_kw: contract.contracted_kw,
        peak_demand_kw: max_of(site.iter().filter_map(|r| r.power_kw)),
        max_demand_recorded_kw: max_of(site.iter().filter_map(|r| r.max_demand_kw)),
        load_avg_pct: load_spread.map(|s| s.mean),
        load_max_pct: load_spread.map(|s| s.max),
        idle_time_pct: load_spread.map(|_| pct(idle, loads.len())),
        load_distribution: load_distribution(&loads, &load.distribution_edges_pct),
        apparent_power_max_kva: max_of(site.iter().filter_map(|r| r.apparent_power_kva)),
        run_hours: max_of(site.iter().filter_map(|r| r.run_hours)),
    }
}

/// Largest deviation from the three-phase mean, as a percentage of the mean.
pub fn unbalance_pct(phases: [f64; 3]) -> Option<f64> {
    let phases = phases.map(f64::abs);
    let mean = phases.iter().sum::<f64>() / 3.0;
    if mean <= 0.0 {
        return None;
    }
    let max_dev = phases.iter().map(|p| (p - mean).abs()).fold(0.0, f64::max);
    Some(max_dev / mean * 100.0)
}

fn unbalance_stats(values: Vec<f64>, warning_threshold_pct: f64) -> UnbalanceStats {
    let spread = Spread::of(values.iter().copied());
    UnbalanceStats {
        avg_pct: spread.map(|s| s.mean),
        max_pct: spread.map(|s| s.max),
        warning_threshold_pct,
        warning_count: values.iter().filter(|v| **v > warning_threshold_pct).count(),
    }
}

/// Supplied unbalance columns win; otherwise derive from per-phase values.
pub fn evaluate_unbalance(readings: &[&Reading], cfg: &UnbalanceConfig) -> UnbalanceSummary {
    let voltage = readings
        .iter()
        .filter_map(|r| {
            r.voltage_unbalance_pct
                .or_else(|| r.phase_voltages.complete().and_then(unbalance_pct))
        })
        .collect();
    let current = readings
        .iter()
        .filter_map(|r| {
            r.current_unbalance_pct
                .or_else(|| r.phase_currents_a.complete().and_then(unbalance_pct))
        })
        .collect();

    UnbalanceSummary {
        voltage: unbalance_stats(voltage, cfg.voltage_warning_pct),
        current: unbalance_stats(current, cfg.current_warning_pct),
    }
}

pub fn evaluate_grid(readings: &[&Reading]) -> GridSummary {
    let frequency = Spread::of(readings.iter().filter_map(|r| r.frequency_hz));
    let vll = Spread::of(readings.iter().filter_map(|r| r.voltage_ll_avg));
    let vln = Spread::of(readings.iter().filter_map(|r| r.voltage_ln_avg));
    GridSummary {
        frequency_min_hz: frequency.map(|s| s.min),
        frequency_max_hz: frequency.map(|s| s.max),
        vll_min: vll.map(|s| s.min),
        vll_max: vll.map(|s| s.max),
        vln_min: vln.map(|s| s.min),
        vln_max: vln.map(|s| s.max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_domain::PhaseValues;
    use time::macros::datetime;

    fn reading() -> Reading {
        Reading::empty("Shed_01", datetime!(2024-06-10 10:00))
    }

    #[test]
    fn demand_uses_supplied_load_else_power_over_contract() {
        let mut a = reading();
        a.power_kw = Some(100.0);
        a.max_demand_kw = Some(140.0);
        let mut b = reading();
        b.power_kw = Some(10.0);
        b.load_pct = Some(4.0);

        let d = evaluate_demand(&[&a, &b], &ContractConfig::default(), &LoadConfig::default());

        assert_eq!(d.peak_demand_kw, Some(100.0));
        assert_eq!(d.max_demand_recorded_kw, Some(140.0));
        assert_eq!(d.load_max_pct, Some(50.0));
        assert_eq!(d.load_avg_pct, Some(27.0));
        assert_eq!(d.idle_time_pct, Some(50.0));
        assert_eq!(d.load_distribution.len(), 5);
        assert_eq!(d.load_distribution[0].share_pct, 50.0);
        assert_eq!(d.load_distribution[2].share_pct, 50.0);
    }

    #[test]
    fn load_bands_are_right_closed() {
        let edges = [10.0, 25.0, 50.0, 75.0];
        let loads = [0.0, 10.0, 10.5, 25.0, 60.0, 75.0, 80.0, 120.0];
        let d = load_distribution(&loads, &edges);

        let shares: Vec<f64> = d.iter().map(|b| b.share_pct).collect();
        assert_eq!(shares, vec![25.0, 25.0, 0.0, 25.0, 25.0]);
        assert_eq!((d[0].lower_pct, d[0].upper_pct), (None, Some(10.0)));
        assert_eq!((d[4].lower_pct, d[4].upper_pct), (Some(75.0), None));
        assert_eq!(d[2].label(), "25-50%");
        assert!(load_distribution(&[], &edges).is_empty());
    }

    #[test]
    fn apparent_power_and_run_hours_take_the_maximum() {
        let mut a = reading();
        a.apparent_power_kva = Some(120.0);
        a.run_hours = Some(1500.0);
        let mut b = reading();
        b.apparent_power_kva = Some(95.0);
        b.run_hours = Some(1502.5);

        let d = evaluate_demand(&[&a, &b], &ContractConfig::default(), &LoadConfig::default());
        assert_eq!(d.apparent_power_max_kva, Some(120.0));
        assert_eq!(d.run_hours, Some(1502.5));
    }

    #[test]
    fn demand_without_columns_is_null_not_zero() {
        let r = reading();
        let d = evaluate_demand(&[&r], &ContractConfig::default(), &LoadConfig::default());
        assert_eq!(d.peak_demand_kw, None);
        assert_eq!(d.load_avg_pct, None);
        assert_eq!(d.idle_time_pct, None);
        assert!(d.load_distribution.is_empty());
        assert_eq!(d.run_hours, None);
    }

    #[test]
    fn unbalance_from_phases() {
        assert_eq!(unbalance_pct([230.0, 230.0, 230.0]), Some(0.0));
        assert_eq!(unbalance_pct([0.0, 0.0, 0.0]), None);
        // mean 20, max deviation 10
        assert_eq!(unbalance_pct([30.0, 20.0, 10.0]), Some(50.0));

        let mut r = reading();
        r.phase_currents_a = PhaseValues::new(Some(30.0), Some(20.0), Some(10.0));
        r.voltage_unbalance_pct = Some(2.5);
        let u = evaluate_unbalance(&[&r], &UnbalanceConfig::default());

        assert_eq!(u.current.max_pct, Some(50.0));
        assert_eq!(u.current.warning_count, 1);
        assert_eq!(u.voltage.avg_pct, Some(2.5));
        assert_eq!(u.voltage.warning_count, 1);
    }

    #[test]
    fn grid_ranges() {
        let mut a = reading();
        a.frequency_hz = Some(49.9);
        a.voltage_ll_avg = Some(410.0);
        a.voltage_ln_avg = Some(236.0);
        let mut b = reading();
        b.frequency_hz = Some(50.1);
        b.voltage_ln_avg = Some(229.5);

        let g = evaluate_grid(&[&a, &b]);
        assert_eq!((g.frequency_min_hz, g.frequency_max_hz), (Some(49.9), Some(50.1)));
        assert_eq!((g.vll_min, g.vll_max), (Some(410.0), Some(410.0)));
        assert_eq!((g.vln_min, g.vln_max), (Some(229.5), Some(236.0)));
    }
}
