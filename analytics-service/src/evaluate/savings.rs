//! Advisory monthly savings estimate.
//!
//! Three independent opportunities are costed, summed, then discounted by the
//! realization factor. Each line item is kept with its status and a plain
//! justification so the report can show its working.

use meter_domain::{SavingsEstimate, SavingsKind, SavingsLine, SavingsStatus, TodValues, SAVINGS_LABEL};

use crate::config::{ContractConfig, SavingsConfig, TariffConfig};

/// Figures the estimate is built from, all for the report scope.
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsInputs {
    pub peak_demand_kw: Option<f64>,
    pub avg_pf: Option<f64>,
    /// Site energy, `None` when no energy register was available.
    pub energy_kwh: Option<f64>,
    pub tod_energy_kwh: TodValues<f64>,
    pub data_days: u32,
}

struct LineBuilder<'a> {
    cfg: &'a SavingsConfig,
}

impl LineBuilder<'_> {
    fn missing(&self, kind: SavingsKind, what: &str) -> SavingsLine {
        SavingsLine {
            kind,
            status: SavingsStatus::MissingInput,
            monthly_amount: 0.0,
            justification: format!("skipped: no {what} available"),
        }
    }

    fn not_applicable(&self, kind: SavingsKind, justification: String) -> SavingsLine {
        SavingsLine { kind, status: SavingsStatus::NotApplicable, monthly_amount: 0.0, justification }
    }

    fn amount(&self, kind: SavingsKind, monthly_amount: f64, justification: String) -> SavingsLine {
        let status = if monthly_amount > self.cfg.min_line_item {
            SavingsStatus::Applied
        } else {
            SavingsStatus::BelowMinimum
        };
        SavingsLine { kind, status, monthly_amount, justification }
    }
}

fn demand_contract(b: &LineBuilder<'_>, input: &SavingsInputs, contract: &ContractConfig) -> SavingsLine {
    let kind = SavingsKind::DemandContract;
    let cfg = b.cfg;
    let Some(peak) = input.peak_demand_kw.filter(|p| *p > 0.0) else {
        return b.missing(kind, "power reading");
    };

    let optimal_kw = peak * cfg.contract_buffer;
    let trigger_kw = contract.contracted_kw * cfg.downsize_trigger;
    if optimal_kw >= trigger_kw {
        return b.not_applicable(
            kind,
            format!("peak {peak:.1} kW needs {optimal_kw:.0} kW with buffer, not below {trigger_kw:.0} kW"),
        );
    }

    let reduction_kva = (contract.contracted_kw - optimal_kw) / cfg.kva_conversion_pf;
    let reduction_pct = (contract.contracted_kw - optimal_kw) / contract.contracted_kw * 100.0;
    b.amount(
        kind,
        reduction_kva * cfg.demand_charge_per_kva_month,
        format!(
            "reduce contract {reduction_pct:.0}% from {:.0} kW to {optimal_kw:.0} kW (peak {peak:.1} kW)",
            contract.contracted_kw
        ),
    )
}

fn power_factor_penalty(b: &LineBuilder<'_>, input: &SavingsInputs, monthly_factor: f64) -> SavingsLine {
    let kind = SavingsKind::PowerFactorPenalty;
    let cfg = b.cfg;
    let Some(avg_pf) = input.avg_pf.filter(|pf| *pf > 0.0) else {
        return b.missing(kind, "power factor");
    };
    if avg_pf >= cfg.pf_benchmark {
        return b.not_applicable(kind, format!("average PF {avg_pf:.3} meets the {:.2} benchmark", cfg.pf_benchmark));
    }
    let Some(energy) = input.energy_kwh.filter(|e| *e > 0.0) else {
        return b.missing(kind, "energy consumption");
    };

    // 1% of the energy bill per 0.01 of shortfall.
    let shortfall = cfg.pf_benchmark - avg_pf;
    let penalty_pct = shortfall * 100.0;
    let monthly_bill = energy * monthly_factor * cfg.blended_rate;
    b.amount(
        kind,
        monthly_bill * penalty_pct / 100.0,
        format!("improve average PF from {avg_pf:.2} to {:.2} ({penalty_pct:.1}% penalty)", cfg.pf_benchmark),
    )
}

fn tod_shift(
    b: &LineBuilder<'_>,
    input: &SavingsInputs,
    tariff: &TariffConfig,
    monthly_factor: f64,
) -> SavingsLine {
    let kind = SavingsKind::TodShift;
    let cfg = b.cfg;
    if input.energy_kwh.is_none() {
        return b.missing(kind, "energy consumption");
    }
    let peak_kwh = input.tod_energy_kwh.peak;
    let rate_diff = tariff.rates.peak - tariff.rates.offpeak;
    if peak_kwh <= 0.0 || rate_diff <= 0.0 {
        return b.not_applicable(kind, "no PEAK consumption to shift".to_string());
    }

    let shiftable = peak_kwh * monthly_factor * cfg.shiftable_fraction;
    b.amount(
        kind,
        shiftable * rate_diff,
        format!(
            "shift {shiftable:.0} kWh/month ({:.0}% of PEAK) to OFFPEAK at {rate_diff:.2}/kWh less",
            cfg.shiftable_fraction * 100.0
        ),
    )
}

pub fn estimate_savings(
    input: &SavingsInputs,
    contract: &ContractConfig,
    tariff: &TariffConfig,
    cfg: &SavingsConfig,
) -> SavingsEstimate {
    let b = LineBuilder { cfg };
    let monthly_factor = cfg.days_per_month / f64::from(input.data_days.max(1));

    let line_items = vec![
        demand_contract(&b, input, contract),
        power_factor_penalty(&b, input, monthly_factor),
        tod_shift(&b, input, tariff, monthly_factor),
    ];

    let gross_monthly: f64 = line_items
        .iter()
        .filter(|l| l.status == SavingsStatus::Applied)
        .map(|l| l.monthly_amount)
        .sum();
    let realizable_monthly = gross_monthly * cfg.realization_factor;

    SavingsEstimate {
        label: SAVINGS_LABEL.to_string(),
        line_items,
        gross_monthly,
        realization_factor: cfg.realization_factor,
        realizable_monthly,
        period_days: input.data_days,
        period_amount: realizable_monthly * f64::from(input.data_days) / cfg.days_per_month,
        annual_amount: realizable_monthly * 12.0,
    }
}
