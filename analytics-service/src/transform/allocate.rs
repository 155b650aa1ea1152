//! Time-of-day allocation, costing and the site total across a meter hierarchy.

use std::collections::{BTreeMap, BTreeSet};

use meter_domain::{
    ConsumptionInterval, DailyTodTotal, DayType, HierarchyMode, MeterEnergy, MeterRole, TodPeriod,
    TodValues,
};
use time::{Date, PrimitiveDateTime};

use super::reconcile::EnergyStep;
use crate::config::{HierarchyConfig, TariffConfig, TodSchedule};

impl TodSchedule {
    /// Clock-derived period for a local hour. Windows are `[start, end)`.
    pub fn classify(&self, hour: u8) -> TodPeriod {
        if (self.normal_start..self.normal_end).contains(&hour) {
            TodPeriod::Normal
        } else if (self.peak_start..self.peak_end).contains(&hour) {
            TodPeriod::Peak
        } else {
            TodPeriod::Offpeak
        }
    }
}

impl TariffConfig {
    /// Period of a step: the closing reading's tag wins over the clock.
    pub fn period_of(&self, closing_ts: PrimitiveDateTime, tag: Option<TodPeriod>) -> TodPeriod {
        tag.unwrap_or_else(|| self.schedule.classify(closing_ts.hour()))
    }
}

/// One meter's steps, priced and bucketed by day and period.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterAllocation {
    pub meter_id: String,
    pub intervals: Vec<ConsumptionInterval>,
    pub daily: BTreeMap<Date, DailyTodTotal>,
}

impl MeterAllocation {
    pub fn tod_energy_kwh(&self) -> TodValues<f64> {
        let mut total = TodValues::default();
        for day in self.daily.values() {
            total += day.energy_kwh;
        }
        total
    }
}

pub fn allocate_meter(meter_id: &str, steps: &[EnergyStep], tariff: &TariffConfig) -> MeterAllocation {
    let mut intervals = Vec::with_capacity(steps.len());
    let mut daily: BTreeMap<Date, DailyTodTotal> = BTreeMap::new();

    for step in steps {
        let period = tariff.period_of(step.end, step.closing_tod_tag);
        let rate = tariff.rates.get(period);
        let cost = step.delta_kwh * rate;

        let day = daily.entry(step.end.date()).or_insert_with(|| DailyTodTotal::new(step.end.date()));
        *day.energy_kwh.get_mut(period) += step.delta_kwh;
        *day.cost.get_mut(period) += cost;

        intervals.push(ConsumptionInterval {
            meter_id: meter_id.to_string(),
            period_start: step.start,
            period_end: step.end,
            tod_period: period,
            energy_kwh: step.delta_kwh,
            cost,
        });
    }

    MeterAllocation { meter_id: meter_id.to_string(), intervals, daily }
}

/// Site-level totals plus the per-meter breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteAllocation {
    pub mode: HierarchyMode,
    pub meters: Vec<MeterEnergy>,
    /// Per-day totals of the meters included in the site total.
    pub daily: Vec<DailyTodTotal>,
    pub tod_energy_kwh: TodValues<f64>,
    pub tod_cost: TodValues<f64>,
    pub total_kwh: f64,
    pub total_cost: f64,
    /// Sub-meter energy that exceeded the parent's bucket and was discarded.
    pub clamped_kwh: f64,
    pub weekday_avg_daily_kwh: Option<f64>,
    pub weekend_avg_daily_kwh: Option<f64>,
}

/// Bucketed energy of one meter after hierarchy clamping.
struct Buckets {
    energy: BTreeMap<Date, TodValues<f64>>,
    clamped_kwh: f64,
}

impl Buckets {
    fn of(alloc: &MeterAllocation) -> Self {
        Self {
            energy: alloc.daily.iter().map(|(d, t)| (*d, t.energy_kwh)).collect(),
            clamped_kwh: 0.0,
        }
    }

    /// Cap every (day, period) bucket at the parent's value for the same bucket.
    fn clamp_to(&mut self, parent: &Buckets) {
        for (date, values) in self.energy.iter_mut() {
            let cap = parent.energy.get(date).copied().unwrap_or_default();
            for period in TodPeriod::ALL {
                let v = values.get_mut(period);
                let limit = cap.get(period);
                if *v > limit {
                    self.clamped_kwh += *v - limit;
                    *v = limit;
                }
            }
        }
    }

    fn tod_total(&self) -> TodValues<f64> {
        let mut total = TodValues::default();
        for v in self.energy.values() {
            total += *v;
        }
        total
    }
}

/// Form the site total from per-meter allocations.
///
/// With a configured hierarchy, only root meters count towards the site and
/// each sub-meter is capped at its parent per (day, period). Without one,
/// several meters are summed and the result is flagged as `Independent`.
pub fn allocate_site(
    meters: &[MeterAllocation],
    hierarchy: &HierarchyConfig,
    tariff: &TariffConfig,
) -> SiteAllocation {
    let present: BTreeSet<&str> = meters.iter().map(|m| m.meter_id.as_str()).collect();
    let mode = if meters.len() <= 1 {
        HierarchyMode::SingleMeter
    } else if hierarchy.is_configured() {
        HierarchyMode::Deduplicated
    } else {
        tracing::warn!(meters = meters.len(), "no meter hierarchy configured; summing all meters independently");
        HierarchyMode::Independent
    };

    // Parent links that can be honoured with the data at hand.
    let parents: BTreeMap<&str, &str> = match mode {
        HierarchyMode::Deduplicated => hierarchy
            .parents()
            .into_iter()
            .filter(|(sub, parent)| {
                let usable = present.contains(sub) && present.contains(parent);
                if present.contains(sub) && !usable {
                    tracing::warn!(meter = *sub, parent = *parent, "parent meter has no data; counting sub-meter as a root");
                }
                usable
            })
            .collect(),
        _ => BTreeMap::new(),
    };

    let depth = |id: &str| {
        let mut d = 0;
        let mut cursor = id;
        while let Some(&p) = parents.get(cursor) {
            cursor = p;
            d += 1;
        }
        d
    };

    // Parents are clamped before their children.
    let mut order: Vec<&MeterAllocation> = meters.iter().collect();
    order.sort_by_key(|m| depth(m.meter_id.as_str()));

    let mut buckets: BTreeMap<&str, Buckets> = BTreeMap::new();
    for m in order {
        let mut b = Buckets::of(m);
        if let Some(parent) = parents.get(m.meter_id.as_str()).and_then(|p| buckets.get(p)) {
            b.clamp_to(parent);
            if b.clamped_kwh > 0.0 {
                tracing::warn!(meter = %m.meter_id, clamped_kwh = b.clamped_kwh, "sub-meter exceeded its parent; excess discarded");
            }
        }
        buckets.insert(m.meter_id.as_str(), b);
    }

    let included = |id: &str| !parents.contains_key(id);

    let mut daily: BTreeMap<Date, DailyTodTotal> = BTreeMap::new();
    for m in meters.iter().filter(|m| included(m.meter_id.as_str())) {
        for (date, day) in &m.daily {
            let site_day = daily.entry(*date).or_insert_with(|| DailyTodTotal::new(*date));
            site_day.energy_kwh += day.energy_kwh;
            site_day.cost += day.cost;
        }
    }

    let mut tod_energy_kwh = TodValues::default();
    for day in daily.values() {
        tod_energy_kwh += day.energy_kwh;
    }
    let tod_cost = tod_energy_kwh.times(&tariff.rates);
    let total_kwh = tod_energy_kwh.total();
    let total_cost = tod_cost.total();

    let mut breakdown = Vec::with_capacity(meters.len());
    let mut clamped_kwh = 0.0;
    for m in meters {
        let id = m.meter_id.as_str();
        let Some(b) = buckets.get(id) else { continue };
        let tod = b.tod_total();
        let energy_kwh = tod.total();
        clamped_kwh += b.clamped_kwh;

        let subs_kwh: Option<f64> = {
            let subs: Vec<&Buckets> = parents
                .iter()
                .filter(|(_, p)| **p == id)
                .filter_map(|(s, _)| buckets.get(s))
                .collect();
            (!subs.is_empty()).then(|| subs.iter().map(|s| s.tod_total().total()).sum())
        };

        let role = match (mode, parents.get(id)) {
            (HierarchyMode::Deduplicated, Some(parent)) => MeterRole::Sub { parent: parent.to_string() },
            (HierarchyMode::Deduplicated, None) => MeterRole::Main,
            _ => MeterRole::Independent,
        };

        breakdown.push(MeterEnergy {
            meter_id: id.to_string(),
            role,
            included_in_site_total: included(id),
            energy_kwh,
            cost: tod.times(&tariff.rates).total(),
            tod_energy_kwh: tod,
            clamped_kwh: b.clamped_kwh,
            other_loads_kwh: subs_kwh.map(|subs| (energy_kwh - subs).max(0.0)),
            share_of_site_pct: (total_kwh > 0.0).then(|| energy_kwh / total_kwh * 100.0),
        });
    }

    let daily: Vec<DailyTodTotal> = daily.into_values().collect();
    SiteAllocation {
        mode,
        meters: breakdown,
        weekday_avg_daily_kwh: average_daily(&daily, DayType::Weekday),
        weekend_avg_daily_kwh: average_daily(&daily, DayType::Weekend),
        daily,
        tod_energy_kwh,
        tod_cost,
        total_kwh,
        total_cost,
        clamped_kwh,
    }
}

fn average_daily(daily: &[DailyTodTotal], day_type: DayType) -> Option<f64> {
    let days: Vec<f64> = daily
        .iter()
        .filter(|d| d.day_type == day_type)
        .map(DailyTodTotal::total_energy_kwh)
        .collect();
    (!days.is_empty()).then(|| days.iter().sum::<f64>() / days.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubMeterLink;
    use time::macros::datetime;

    fn step(end: PrimitiveDateTime, kwh: f64, tag: Option<TodPeriod>) -> EnergyStep {
        EnergyStep { start: end - time::Duration::minutes(5), end, delta_kwh: kwh, closing_tod_tag: tag }
    }

    fn linked(sub: &str, parent: &str) -> HierarchyConfig {
        HierarchyConfig {
            sub_meters: vec![SubMeterLink { meter: sub.to_string(), parent: parent.to_string() }],
        }
    }

    #[test]
    fn clock_windows_are_half_open() {
        let s = TodSchedule::default();
        assert_eq!(s.classify(5), TodPeriod::Offpeak);
        assert_eq!(s.classify(6), TodPeriod::Normal);
        assert_eq!(s.classify(16), TodPeriod::Normal);
        assert_eq!(s.classify(17), TodPeriod::Peak);
        assert_eq!(s.classify(22), TodPeriod::Peak);
        assert_eq!(s.classify(23), TodPeriod::Offpeak);
    }

    #[test]
    fn supplied_tag_overrides_clock() {
        let tariff = TariffConfig::default();
        let a = allocate_meter("M1", &[step(datetime!(2024-06-10 12:00), 1.0, Some(TodPeriod::Peak))], &tariff);
        assert_eq!(a.intervals[0].tod_period, TodPeriod::Peak);
        assert_eq!(a.intervals[0].cost, 8.37);
    }

    #[test]
    fn tod_cost_is_energy_times_rate_per_period() {
        let tariff = TariffConfig::default();
        let steps = [
            step(datetime!(2024-06-10 18:00), 100.0, None),
            step(datetime!(2024-06-10 10:00), 200.0, None),
            step(datetime!(2024-06-10 2:00), 50.0, None),
        ];
        let site = allocate_site(&[allocate_meter("M1", &steps, &tariff)], &HierarchyConfig::default(), &tariff);

        assert_eq!(site.mode, HierarchyMode::SingleMeter);
        assert_eq!(site.tod_energy_kwh, TodValues { peak: 100.0, normal: 200.0, offpeak: 50.0 });
        assert_eq!(site.total_cost, 100.0 * 8.37 + 200.0 * 6.87 + 50.0 * 5.18);
        assert_eq!(site.daily.len(), 1);
        assert_eq!(site.daily[0].day_type, DayType::Weekday);
    }

    #[test]
    fn site_total_counts_main_meter_only() {
        let tariff = TariffConfig::default();
        let t = datetime!(2024-06-10 10:00);
        let main = allocate_meter("Main", &[step(t, 100.0, None)], &tariff);
        let sub = allocate_meter("Sub", &[step(t, 30.0, None)], &tariff);

        let site = allocate_site(&[main, sub], &linked("Sub", "Main"), &tariff);

        assert_eq!(site.mode, HierarchyMode::Deduplicated);
        assert_eq!(site.total_kwh, 100.0);
        let main = &site.meters[0];
        let sub = &site.meters[1];
        assert_eq!(main.role, MeterRole::Main);
        assert!(main.included_in_site_total);
        assert_eq!(main.other_loads_kwh, Some(70.0));
        assert_eq!(sub.role, MeterRole::Sub { parent: "Main".to_string() });
        assert!(!sub.included_in_site_total);
        assert!(sub.energy_kwh <= main.energy_kwh);
    }

    #[test]
    fn sub_meter_is_clamped_per_bucket() {
        let tariff = TariffConfig::default();
        let main = allocate_meter(
            "Main",
            &[step(datetime!(2024-06-10 10:00), 10.0, None), step(datetime!(2024-06-10 18:00), 50.0, None)],
            &tariff,
        );
        // Sub exceeds main in NORMAL even though its day total is lower.
        let sub = allocate_meter("Sub", &[step(datetime!(2024-06-10 10:05), 25.0, None)], &tariff);

        let site = allocate_site(&[main, sub], &linked("Sub", "Main"), &tariff);
        let sub = site.meters.iter().find(|m| m.meter_id == "Sub").unwrap();

        assert_eq!(sub.tod_energy_kwh.normal, 10.0);
        assert_eq!(sub.clamped_kwh, 15.0);
        assert_eq!(site.clamped_kwh, 15.0);
        assert_eq!(site.total_kwh, 60.0);
    }

    #[test]
    fn without_hierarchy_all_meters_are_summed_and_flagged() {
        let tariff = TariffConfig::default();
        let t = datetime!(2024-06-10 10:00);
        let a = allocate_meter("A", &[step(t, 10.0, None)], &tariff);
        let b = allocate_meter("B", &[step(t, 5.0, None)], &tariff);

        let site = allocate_site(&[a, b], &HierarchyConfig::default(), &tariff);

        assert_eq!(site.mode, HierarchyMode::Independent);
        assert_eq!(site.total_kwh, 15.0);
        assert!(site.meters.iter().all(|m| m.role == MeterRole::Independent && m.included_in_site_total));
        assert_eq!(site.meters[0].share_of_site_pct, Some(10.0 / 15.0 * 100.0));
    }

    #[test]
    fn sub_without_parent_data_counts_as_root() {
        let tariff = TariffConfig::default();
        let t = datetime!(2024-06-10 10:00);
        let a = allocate_meter("A", &[step(t, 10.0, None)], &tariff);
        let b = allocate_meter("B", &[step(t, 5.0, None)], &tariff);

        let site = allocate_site(&[a, b], &linked("B", "Missing"), &tariff);

        assert_eq!(site.mode, HierarchyMode::Deduplicated);
        assert_eq!(site.total_kwh, 15.0);
    }

    #[test]
    fn weekday_and_weekend_averages() {
        let tariff = TariffConfig::default();
        let steps = [
            step(datetime!(2024-06-08 10:00), 10.0, None),
            step(datetime!(2024-06-09 10:00), 20.0, None),
            step(datetime!(2024-06-10 10:00), 40.0, None),
        ];
        let site = allocate_site(&[allocate_meter("M1", &steps, &tariff)], &HierarchyConfig::default(), &tariff);

        assert_eq!(site.weekend_avg_daily_kwh, Some(15.0));
        assert_eq!(site.weekday_avg_daily_kwh, Some(40.0));
    }
}
