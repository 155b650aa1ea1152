//! ToD planner: weekly and monthly period rollups measured against a target
//! energy split, plus per-period baseline load.

use std::collections::BTreeMap;

use meter_domain::{DailyTodTotal, Reading, TodPeriod, TodPlanner, TodRollup, TodTargetComparison, TodValues};
use time::Date;

use crate::config::{PlannerConfig, TariffConfig};

/// ISO-8601 week, e.g. `2024-W24`. Days around New Year land in the ISO year.
pub fn week_label(date: Date) -> String {
    let (year, week, _) = date.to_iso_week_date();
    format!("{year}-W{week:02}")
}

pub fn month_label(date: Date) -> String {
    format!("{}-{:02}", date.year(), u8::from(date.month()))
}

/// Sum daily totals into buckets keyed by `label`, oldest first.
fn rollup(daily: &[DailyTodTotal], label: fn(Date) -> String) -> Vec<TodRollup> {
    let mut groups: BTreeMap<String, (TodValues<f64>, TodValues<f64>)> = BTreeMap::new();
    for day in daily {
        let (energy, cost) = groups.entry(label(day.date)).or_default();
        *energy += day.energy_kwh;
        *cost += day.cost;
    }
    groups
        .into_iter()
        .map(|(label, (energy_kwh, cost))| TodRollup { label, energy_kwh, cost })
        .collect()
}

pub fn weekly_rollups(daily: &[DailyTodTotal]) -> Vec<TodRollup> {
    rollup(daily, week_label)
}

pub fn monthly_rollups(daily: &[DailyTodTotal]) -> Vec<TodRollup> {
    rollup(daily, month_label)
}

/// What the rollup would have cost had its energy followed `split`.
/// `None` when the rollup holds no energy.
pub fn compare_to_target(rollup: &TodRollup, split: &TodValues<f64>, rates: &TodValues<f64>) -> Option<TodTargetComparison> {
    let energy = rollup.energy_kwh;
    let total = energy.total();
    if total <= 0.0 {
        return None;
    }

    let actual_pct = TodValues {
        peak: energy.peak / total * 100.0,
        normal: energy.normal / total * 100.0,
        offpeak: energy.offpeak / total * 100.0,
    };
    let target_energy = TodValues {
        peak: total * split.peak,
        normal: total * split.normal,
        offpeak: total * split.offpeak,
    };
    let actual_cost = rollup.cost.total();
    let target_cost = target_energy.times(rates).total();

    Some(TodTargetComparison {
        label: rollup.label.clone(),
        total_kwh: total,
        actual_pct,
        actual_cost,
        target_energy_kwh: target_energy,
        target_cost,
        savings: actual_cost - target_cost,
        shift_from_peak_kwh: (energy.peak - target_energy.peak).max(0.0),
        already_optimal: actual_pct.offpeak >= split.offpeak * 100.0 && actual_pct.peak <= split.peak * 100.0,
    })
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    Some(values[lo] + (values[hi] - values[lo]) * (pos - lo as f64))
}

/// Low-quantile positive power per period; idle (zero) samples are ignored.
pub fn kw_baselines(readings: &[&Reading], tariff: &TariffConfig, q: f64) -> TodValues<Option<f64>> {
    let mut samples: TodValues<Vec<f64>> = TodValues::default();
    for r in readings {
        if let Some(kw) = r.power_kw.filter(|kw| *kw > 0.0) {
            match tariff.period_of(r.ts, r.tod_tag) {
                TodPeriod::Peak => samples.peak.push(kw),
                TodPeriod::Normal => samples.normal.push(kw),
                TodPeriod::Offpeak => samples.offpeak.push(kw),
            }
        }
    }
    TodValues {
        peak: quantile(&mut samples.peak, q),
        normal: quantile(&mut samples.normal, q),
        offpeak: quantile(&mut samples.offpeak, q),
    }
}

pub fn evaluate_tod_planner(
    daily: &[DailyTodTotal],
    site: &[&Reading],
    tariff: &TariffConfig,
    cfg: &PlannerConfig,
) -> TodPlanner {
    let weekly = weekly_rollups(daily);
    let monthly = monthly_rollups(daily);
    let latest = |r: Option<&TodRollup>| r.and_then(|r| compare_to_target(r, &cfg.target_split, &tariff.rates));

    TodPlanner {
        target_split: cfg.target_split,
        latest_week: latest(weekly.last()),
        latest_month: latest(monthly.last()),
        weekly,
        monthly,
        kw_baselines: kw_baselines(site, tariff, cfg.baseline_quantile),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn day(date: Date, peak: f64, normal: f64, offpeak: f64) -> DailyTodTotal {
        let rates = TariffConfig::default().rates;
        let mut d = DailyTodTotal::new(date);
        d.energy_kwh = TodValues { peak, normal, offpeak };
        d.cost = d.energy_kwh.times(&rates);
        d
    }

    #[test]
    fn labels_follow_iso_weeks_and_calendar_months() {
        assert_eq!(week_label(date!(2024 - 06 - 10)), "2024-W24");
        // Sunday 2023-01-01 still belongs to the last ISO week of 2022.
        assert_eq!(week_label(date!(2023 - 01 - 01)), "2022-W52");
        assert_eq!(week_label(date!(2024 - 12 - 30)), "2025-W01");
        assert_eq!(month_label(date!(2024 - 03 - 31)), "2024-03");
    }

    #[test]
    fn rollups_group_days_in_order() {
        let daily = [
            day(date!(2024 - 06 - 10), 10.0, 20.0, 30.0),
            day(date!(2024 - 06 - 11), 5.0, 5.0, 5.0),
            day(date!(2024 - 06 - 17), 1.0, 1.0, 1.0),
            day(date!(2024 - 07 - 01), 2.0, 2.0, 2.0),
        ];

        let weeks = weekly_rollups(&daily);
        let labels: Vec<&str> = weeks.iter().map(|w| w.label.as_str()).collect();
        assert_eq!(labels, vec!["2024-W24", "2024-W25", "2024-W27"]);
        assert_eq!(weeks[0].energy_kwh, TodValues { peak: 15.0, normal: 25.0, offpeak: 35.0 });

        let months = monthly_rollups(&daily);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].label, "2024-06");
        assert!((months[0].energy_kwh.total() - 78.0).abs() < 1e-9);
    }

    #[test]
    fn peak_heavy_week_shows_savings_and_shift() {
        let split = PlannerConfig::default().target_split;
        let rates = TariffConfig::default().rates;
        let weeks = weekly_rollups(&[day(date!(2024 - 06 - 10), 40.0, 40.0, 20.0)]);

        let c = compare_to_target(&weeks[0], &split, &rates).unwrap();
        assert_eq!(c.total_kwh, 100.0);
        assert!((c.actual_pct.peak - 40.0).abs() < 1e-9);
        // 40×8.37 + 40×6.87 + 20×5.18 against 10×8.37 + 45×6.87 + 45×5.18
        assert!((c.actual_cost - 713.2).abs() < 1e-9);
        assert!((c.target_cost - 625.95).abs() < 1e-9);
        assert!((c.savings - 87.25).abs() < 1e-9);
        assert!((c.shift_from_peak_kwh - 30.0).abs() < 1e-9);
        assert!(!c.already_optimal);
    }

    #[test]
    fn offpeak_heavy_week_is_already_optimal() {
        let split = PlannerConfig::default().target_split;
        let rates = TariffConfig::default().rates;
        let weeks = weekly_rollups(&[day(date!(2024 - 06 - 10), 5.0, 40.0, 55.0)]);

        let c = compare_to_target(&weeks[0], &split, &rates).unwrap();
        assert!(c.already_optimal);
        assert_eq!(c.shift_from_peak_kwh, 0.0);
        assert!(c.savings < 0.0);

        let empty = weekly_rollups(&[day(date!(2024 - 06 - 10), 0.0, 0.0, 0.0)]);
        assert_eq!(compare_to_target(&empty[0], &split, &rates), None);
    }

    #[test]
    fn quantile_interpolates_linearly() {
        assert_eq!(quantile(&mut [0.0; 0], 0.1), None);
        assert_eq!(quantile(&mut [7.0], 0.1), Some(7.0));
        // position 0.1 × 4 = 0.4 between 10 and 20
        let q = quantile(&mut [50.0, 10.0, 40.0, 20.0, 30.0], 0.1).unwrap();
        assert!((q - 14.0).abs() < 1e-9);
    }

    #[test]
    fn baselines_ignore_idle_samples_and_split_by_period() {
        let tariff = TariffConfig::default();
        let mut readings = Vec::new();
        for (ts, kw) in [
            (datetime!(2024-06-10 10:00), 0.0),
            (datetime!(2024-06-10 10:05), 12.0),
            (datetime!(2024-06-10 10:10), 22.0),
            (datetime!(2024-06-10 18:00), 30.0),
        ] {
            let mut r = Reading::empty("Shed_01", ts);
            r.power_kw = Some(kw);
            readings.push(r);
        }
        let refs: Vec<&Reading> = readings.iter().collect();

        let b = kw_baselines(&refs, &tariff, 0.10);
        assert!((b.normal.unwrap() - 13.0).abs() < 1e-9);
        assert_eq!(b.peak, Some(30.0));
        assert_eq!(b.offpeak, None);
    }

    #[test]
    fn planner_compares_the_latest_week_and_month() {
        let daily = [
            day(date!(2024 - 05 - 31), 50.0, 30.0, 20.0),
            day(date!(2024 - 06 - 10), 5.0, 40.0, 55.0),
        ];
        let p = evaluate_tod_planner(&daily, &[], &TariffConfig::default(), &PlannerConfig::default());

        assert_eq!(p.weekly.len(), 2);
        assert_eq!(p.latest_week.as_ref().map(|c| c.label.as_str()), Some("2024-W24"));
        assert_eq!(p.latest_month.as_ref().map(|c| c.label.as_str()), Some("2024-06"));
        assert!(p.latest_week.is_some_and(|c| c.already_optimal));
        assert_eq!(p.kw_baselines, TodValues::default());
    }
}
