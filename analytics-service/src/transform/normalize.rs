//! Raw spreadsheet rows -> typed, per-meter, chronologically sorted readings.

use std::collections::BTreeMap;

use meter_domain::{report::TimestampEncoding, PhaseValues, Reading, Severity, TodPeriod};
use time::{
    format_description::BorrowedFormatItem,
    macros::{datetime, format_description},
    Date, Duration, PrimitiveDateTime, Time,
};

use crate::{observability::counters, pipeline::PipelineError, sources::RawTable};

pub const DEFAULT_METER_ID: &str = "default";

const DATETIME_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month padding:none]-[day padding:none] [hour padding:none]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month padding:none]-[day padding:none] [hour padding:none]:[minute]:[second]"),
    format_description!("[year]-[month padding:none]-[day padding:none] [hour padding:none]:[minute]"),
    format_description!("[year]/[month padding:none]/[day padding:none] [hour padding:none]:[minute]:[second]"),
    format_description!("[year]/[month padding:none]/[day padding:none] [hour padding:none]:[minute]"),
    format_description!("[day padding:none]/[month padding:none]/[year] [hour padding:none]:[minute]:[second]"),
    format_description!("[day padding:none]/[month padding:none]/[year] [hour padding:none]:[minute]"),
    format_description!("[day padding:none]-[month padding:none]-[year] [hour padding:none]:[minute]:[second]"),
    format_description!("[day padding:none]-[month padding:none]-[year] [hour padding:none]:[minute]"),
];

const DATE_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month padding:none]-[day padding:none]"),
    format_description!("[year]/[month padding:none]/[day padding:none]"),
    format_description!("[day padding:none]/[month padding:none]/[year]"),
    format_description!("[day padding:none]-[month padding:none]-[year]"),
];

const TIME_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[hour padding:none]:[minute]:[second].[subsecond]"),
    format_description!("[hour padding:none]:[minute]:[second]"),
    format_description!("[hour padding:none]:[minute]"),
];

/// Spreadsheet day zero.
const SERIAL_EPOCH: PrimitiveDateTime = datetime!(1899-12-30 0:00);
/// 9999-12-31 as a serial day number.
const SERIAL_MAX_DAYS: f64 = 2_958_465.0;

/// Which optional columns the source carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnSet {
    pub meter_id: bool,
    pub cumulative_energy: bool,
    pub power: bool,
    pub apparent_power: bool,
    pub current_total: bool,
    pub phase_currents: bool,
    pub power_factor: bool,
    pub voltage_ln: bool,
    pub voltage_ll: bool,
    pub phase_voltages: bool,
    pub neutral_current: bool,
    pub frequency: bool,
    pub voltage_unbalance: bool,
    pub current_unbalance: bool,
    pub load_pct: bool,
    pub max_demand: bool,
    pub run_hours: bool,
    pub tod_period: bool,
    pub fire_risk_level: bool,
}

impl ColumnSet {
    /// Source names of the optional columns that were not found.
    pub fn absent(&self) -> Vec<&'static str> {
        [
            (self.meter_id, "Location"),
            (self.cumulative_energy, "Energy_kWh"),
            (self.power, "kW_Total"),
            (self.apparent_power, "kVA_Total"),
            (self.current_total, "Current_Total"),
            (self.phase_currents, "Current_R/Y/B"),
            (self.power_factor, "PF_Avg"),
            (self.voltage_ln, "VLN_Avg"),
            (self.voltage_ll, "VLL_Avg"),
            (self.phase_voltages, "V_R/Y/B"),
            (self.neutral_current, "Neutral_Current_A"),
            (self.frequency, "Frequency_Hz"),
            (self.voltage_unbalance, "Voltage_Unbalance_Pct"),
            (self.current_unbalance, "Current_Unbalance_Pct"),
            (self.load_pct, "Load_Pct"),
            (self.max_demand, "Max_Demand_kW"),
            (self.run_hours, "Run_Hours"),
            (self.tod_period, "ToD_Period"),
            (self.fire_risk_level, "Fire_Risk_Level"),
        ]
        .into_iter()
        .filter(|(present, _)| !present)
        .map(|(_, name)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationStats {
    pub rows_total: usize,
    pub rows_dropped: usize,
    pub missing_values: usize,
    pub timestamp_encoding: TimestampEncoding,
}

#[derive(Debug, Clone)]
pub struct NormalizedTable {
    /// Readings per meter, each sorted by timestamp ascending.
    pub meters: BTreeMap<String, Vec<Reading>>,
    pub columns: ColumnSet,
    pub stats: NormalizationStats,
}

/// Column positions resolved against the header row.
struct Layout {
    timestamp: Option<usize>,
    date: Option<usize>,
    time: Option<usize>,
    meter_id: Option<usize>,
    energy_kwh: Option<usize>,
    energy_wh: Option<usize>,
    kw: Option<usize>,
    watts: Option<usize>,
    kva: Option<usize>,
    current_total: Option<usize>,
    current: [Option<usize>; 3],
    pf: Option<usize>,
    vln: Option<usize>,
    vll: Option<usize>,
    voltage: [Option<usize>; 3],
    neutral: Option<usize>,
    frequency: Option<usize>,
    v_unbalance: Option<usize>,
    i_unbalance: Option<usize>,
    load_pct: Option<usize>,
    max_demand: Option<usize>,
    run_hours: Option<usize>,
    tod: Option<usize>,
    fire_risk: Option<usize>,
}

impl Layout {
    fn resolve(t: &RawTable) -> Self {
        Self {
            timestamp: t.column("Timestamp"),
            date: t.column("Date"),
            time: t.column("Time"),
            meter_id: t.column_any(&["Location", "Device_ID", "Meter_ID"]),
            energy_kwh: t.column("Energy_kWh"),
            energy_wh: t.column("Energy_Wh"),
            kw: t.column("kW_Total"),
            watts: t.column("Watts_Total"),
            kva: t.column("kVA_Total"),
            current_total: t.column("Current_Total"),
            current: [t.column("Current_R"), t.column("Current_Y"), t.column("Current_B")],
            pf: t.column("PF_Avg"),
            vln: t.column("VLN_Avg"),
            vll: t.column("VLL_Avg"),
            voltage: [t.column("V_R"), t.column("V_Y"), t.column("V_B")],
            neutral: t.column("Neutral_Current_A"),
            frequency: t.column("Frequency_Hz"),
            v_unbalance: t.column("Voltage_Unbalance_Pct"),
            i_unbalance: t.column("Current_Unbalance_Pct"),
            load_pct: t.column("Load_Pct"),
            max_demand: t.column("Max_Demand_kW"),
            run_hours: t.column("Run_Hours"),
            tod: t.column("ToD_Period"),
            fire_risk: t.column("Fire_Risk_Level"),
        }
    }

    fn columns(&self) -> ColumnSet {
        ColumnSet {
            meter_id: self.meter_id.is_some(),
            cumulative_energy: self.energy_kwh.is_some() || self.energy_wh.is_some(),
            power: self.kw.is_some() || self.watts.is_some(),
            apparent_power: self.kva.is_some(),
            current_total: self.current_total.is_some(),
            phase_currents: self.current.iter().all(Option::is_some),
            power_factor: self.pf.is_some(),
            voltage_ln: self.vln.is_some(),
            voltage_ll: self.vll.is_some(),
            phase_voltages: self.voltage.iter().all(Option::is_some),
            neutral_current: self.neutral.is_some(),
            frequency: self.frequency.is_some(),
            voltage_unbalance: self.v_unbalance.is_some(),
            current_unbalance: self.i_unbalance.is_some(),
            load_pct: self.load_pct.is_some(),
            max_demand: self.max_demand.is_some(),
            run_hours: self.run_hours.is_some(),
            tod_period: self.tod.is_some(),
            fire_risk_level: self.fire_risk.is_some(),
        }
    }
}

/// Reads numeric cells of one row, counting unusable ones.
struct RowReader<'a> {
    row: &'a [String],
    missing: usize,
}

impl<'a> RowReader<'a> {
    fn text(&self, col: Option<usize>) -> Option<&'a str> {
        col.and_then(|c| self.row.get(c))
            .map(|s| clean_cell(s))
            .filter(|s| !s.is_empty())
    }

    fn number(&mut self, col: Option<usize>) -> Option<f64> {
        let col = col?;
        let value = self.row.get(col).and_then(|s| parse_number(s));
        if value.is_none() {
            self.missing += 1;
        }
        value
    }

    fn phases(&mut self, cols: [Option<usize>; 3]) -> PhaseValues {
        PhaseValues::new(self.number(cols[0]), self.number(cols[1]), self.number(cols[2]))
    }
}

/// Convert a raw table into per-meter reading sequences.
///
/// Rows without a resolvable timestamp are dropped. Unusable numeric cells
/// become `None`.
pub fn normalize(table: &RawTable) -> Result<NormalizedTable, PipelineError> {
    let layout = Layout::resolve(table);
    if layout.timestamp.is_none() && layout.date.is_none() {
        return Err(PipelineError::DataUnavailable(
            "missing required column: Timestamp (or Date)".to_string(),
        ));
    }
    if layout.meter_id.is_none() {
        tracing::warn!("no meter/location column; treating all rows as meter '{DEFAULT_METER_ID}'");
    }

    let (timestamps, timestamp_encoding) = resolve_timestamps(table, &layout);

    let mut meters: BTreeMap<String, Vec<Reading>> = BTreeMap::new();
    let mut missing_values = 0;
    let mut rows_dropped = 0;

    for (row, ts) in table.rows.iter().zip(timestamps) {
        let Some(ts) = ts else {
            rows_dropped += 1;
            continue;
        };

        let mut r = RowReader { row, missing: 0 };
        let meter_id = r.text(layout.meter_id).unwrap_or(DEFAULT_METER_ID).to_string();

        let cumulative_kwh = match layout.energy_kwh {
            Some(_) => r.number(layout.energy_kwh),
            None => r.number(layout.energy_wh).map(|wh| wh / 1000.0),
        };
        let power_kw = match layout.kw {
            Some(_) => r.number(layout.kw),
            None => r.number(layout.watts).map(|w| w / 1000.0),
        };

        let reading = Reading {
            ts,
            cumulative_kwh,
            power_kw,
            apparent_power_kva: r.number(layout.kva),
            current_total_a: r.number(layout.current_total),
            phase_currents_a: r.phases(layout.current),
            power_factor: r.number(layout.pf),
            voltage_ln_avg: r.number(layout.vln),
            voltage_ll_avg: r.number(layout.vll),
            phase_voltages: r.phases(layout.voltage),
            neutral_current_a: r.number(layout.neutral),
            frequency_hz: r.number(layout.frequency),
            voltage_unbalance_pct: r.number(layout.v_unbalance),
            current_unbalance_pct: r.number(layout.i_unbalance),
            load_pct: r.number(layout.load_pct),
            max_demand_kw: r.number(layout.max_demand),
            run_hours: r.number(layout.run_hours),
            tod_tag: r.text(layout.tod).and_then(TodPeriod::from_tag),
            fire_risk_tag: r.text(layout.fire_risk).and_then(Severity::from_tag),
            meter_id: meter_id.clone(),
        };
        missing_values += r.missing;
        meters.entry(meter_id).or_default().push(reading);
    }

    for readings in meters.values_mut() {
        readings.sort_by(|a, b| a.ts.cmp(&b.ts));
    }

    let stats = NormalizationStats {
        rows_total: table.rows.len(),
        rows_dropped,
        missing_values,
        timestamp_encoding,
    };
    if rows_dropped > 0 {
        metrics::counter!(counters::ROWS_DROPPED).increment(rows_dropped as u64);
        tracing::warn!(rows_dropped, rows_total = stats.rows_total, "dropped rows without a usable timestamp");
    }
    tracing::debug!(meters = meters.len(), missing_values, ?timestamp_encoding, "normalized readings");

    if meters.is_empty() {
        return Err(PipelineError::DataUnavailable("no rows with a usable timestamp".to_string()));
    }

    Ok(NormalizedTable { meters, columns: layout.columns(), stats })
}

/// Resolve one timestamp per row.
///
/// Text encodings are tried first. Only when more than half of the rows fail
/// is the serial-day encoding enabled for the rows that are still unresolved.
fn resolve_timestamps(
    table: &RawTable,
    layout: &Layout,
) -> (Vec<Option<PrimitiveDateTime>>, TimestampEncoding) {
    let cell = |row: &[String], col: Option<usize>| -> Option<String> {
        col.and_then(|c| row.get(c)).map(|s| clean_cell(s).to_string()).filter(|s| !s.is_empty())
    };

    let mut resolved: Vec<Option<PrimitiveDateTime>> = table
        .rows
        .iter()
        .map(|row| {
            cell(row, layout.timestamp)
                .and_then(|s| parse_text_timestamp(&s))
                .or_else(|| {
                    let date = cell(row, layout.date)?;
                    match cell(row, layout.time) {
                        Some(time) => parse_text_timestamp(&format!("{date} {time}")),
                        None => parse_text_timestamp(&date),
                    }
                })
        })
        .collect();

    let failures = resolved.iter().filter(|ts| ts.is_none()).count();
    if failures * 2 <= resolved.len() {
        return (resolved, TimestampEncoding::Text);
    }

    for (row, slot) in table.rows.iter().zip(resolved.iter_mut()) {
        if slot.is_some() {
            continue;
        }
        *slot = cell(row, layout.timestamp)
            .and_then(|s| parse_serial(&s))
            .or_else(|| {
                let date = parse_serial(&cell(row, layout.date)?)?;
                match cell(row, layout.time).and_then(|t| parse_time_of_day(&t)) {
                    Some(time) if date.time() == Time::MIDNIGHT => Some(date.replace_time(time)),
                    _ => Some(date),
                }
            });
    }
    (resolved, TimestampEncoding::SerialDays)
}

/// Strip whitespace and the stray quotes spreadsheets prepend to text cells.
fn clean_cell(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '\'' || c == '"').trim()
}

fn parse_number(s: &str) -> Option<f64> {
    let s = clean_cell(s);
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a textual date-time (or a bare date, at midnight).
pub fn parse_text_timestamp(s: &str) -> Option<PrimitiveDateTime> {
    let s = clean_cell(s);
    let s = s.strip_suffix('Z').unwrap_or(s);
    // ISO `T` separator
    let owned;
    let s = match s.as_bytes().get(10) {
        Some(b'T') => {
            owned = format!("{} {}", &s[..10], &s[11..]);
            owned.as_str()
        }
        _ => s,
    };

    DATETIME_FORMATS
        .iter()
        .find_map(|f| PrimitiveDateTime::parse(s, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| Date::parse(s, f).ok())
                .map(Date::midnight)
        })
}

fn parse_time_of_day(s: &str) -> Option<Time> {
    TIME_FORMATS.iter().find_map(|f| Time::parse(s, f).ok())
}

/// Spreadsheet serial date: days since 1899-12-30, fraction = time of day.
pub fn parse_serial(s: &str) -> Option<PrimitiveDateTime> {
    let days = parse_number(s)?;
    if !(1.0..=SERIAL_MAX_DAYS).contains(&days) {
        return None;
    }
    let seconds = (days * 86_400.0).round() as i64;
    SERIAL_EPOCH.checked_add(Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::parse_csv_table;
    use time::macros::datetime;

    fn table(csv: &str) -> RawTable {
        parse_csv_table(csv.as_bytes()).unwrap()
    }

    #[test]
    fn parses_text_timestamp_variants() {
        let want = datetime!(2024-06-10 14:05:00);
        for s in [
            "2024-06-10 14:05:00",
            "2024-06-10T14:05:00",
            "2024-06-10T14:05:00Z",
            "'2024-06-10 14:05:00",
            "2024-06-10 14:05",
            "2024/06/10 14:05:00",
            "10/06/2024 14:05:00",
            "10-06-2024 14:05",
        ] {
            assert_eq!(parse_text_timestamp(s), Some(want), "{s}");
        }
        assert_eq!(
            parse_text_timestamp("2024-06-10 14:05:00.250"),
            Some(datetime!(2024-06-10 14:05:00.25))
        );
        assert_eq!(parse_text_timestamp("2024-6-1 9:05"), Some(datetime!(2024-06-01 9:05)));
        assert_eq!(parse_text_timestamp("2024-06-10"), Some(datetime!(2024-06-10 0:00)));
        assert_eq!(parse_text_timestamp("not a date"), None);
        assert_eq!(parse_text_timestamp("45453.5"), None);
    }

    #[test]
    fn slash_dates_are_day_first() {
        assert_eq!(parse_text_timestamp("03/04/2024 10:00"), Some(datetime!(2024-04-03 10:00)));
        assert_eq!(parse_text_timestamp("03-04-2024"), Some(datetime!(2024-04-03 0:00)));
        // month-first with a day above 12 is not a valid day-first date
        assert_eq!(parse_text_timestamp("04/13/2024 10:00"), None);
    }

    #[test]
    fn parses_serial_days() {
        assert_eq!(parse_serial("45453.5"), Some(datetime!(2024-06-10 12:00)));
        assert_eq!(parse_serial("45453"), Some(datetime!(2024-06-10 0:00)));
        assert_eq!(parse_serial("0"), None);
        assert_eq!(parse_serial("abc"), None);
    }

    #[test]
    fn drops_rows_without_timestamp_and_sorts_per_meter() {
        let t = table(
            "Timestamp,Location,Energy_kWh\n\
             2024-06-10 10:10:00,Shed_01,102\n\
             garbage,Shed_01,999\n\
             2024-06-10 10:00:00,Shed_01,100\n\
             2024-06-10 10:05:00,Shed_02,50\n\
             2024-06-10 10:05:00,Shed_01,101\n",
        );
        let n = normalize(&t).unwrap();

        assert_eq!(n.stats.rows_total, 5);
        assert_eq!(n.stats.rows_dropped, 1);
        assert_eq!(n.stats.timestamp_encoding, TimestampEncoding::Text);
        assert_eq!(n.meters.len(), 2);

        let shed1: Vec<f64> = n.meters["Shed_01"].iter().filter_map(|r| r.cumulative_kwh).collect();
        assert_eq!(shed1, vec![100.0, 101.0, 102.0]);
        assert!(n.meters["Shed_01"].windows(2).all(|w| w[0].ts <= w[1].ts));
    }

    #[test]
    fn non_numeric_and_infinite_cells_become_missing() {
        let t = table(
            "Timestamp,Location,kW_Total,PF_Avg,Frequency_Hz\n\
             2024-06-10 10:00:00,Shed_01,n/a,inf,\n\
             2024-06-10 10:05:00,Shed_01,12.5,0.95,50.01\n",
        );
        let n = normalize(&t).unwrap();
        let r = &n.meters["Shed_01"];

        assert_eq!(r[0].power_kw, None);
        assert_eq!(r[0].power_factor, None);
        assert_eq!(r[0].frequency_hz, None);
        assert_eq!(r[1].power_kw, Some(12.5));
        assert_eq!(n.stats.missing_values, 3);
        assert!(n.columns.power && n.columns.power_factor && !n.columns.neutral_current);
    }

    #[test]
    fn falls_back_to_serial_when_most_rows_fail_text_parsing() {
        let t = table(
            "Timestamp,Location,Energy_kWh\n\
             45453.5,Shed_01,100\n\
             45453.503472222,Shed_01,101\n\
             2024-06-10 12:10:00,Shed_01,102\n",
        );
        let n = normalize(&t).unwrap();
        let ts: Vec<_> = n.meters["Shed_01"].iter().map(|r| r.ts).collect();

        assert_eq!(n.stats.timestamp_encoding, TimestampEncoding::SerialDays);
        assert_eq!(ts, vec![datetime!(2024-06-10 12:00), datetime!(2024-06-10 12:05), datetime!(2024-06-10 12:10)]);
    }

    #[test]
    fn serial_is_not_used_when_text_majority_parses() {
        let t = table(
            "Timestamp,Location\n\
             2024-06-10 12:00:00,Shed_01\n\
             2024-06-10 12:05:00,Shed_01\n\
             45453.5,Shed_01\n",
        );
        let n = normalize(&t).unwrap();
        assert_eq!(n.stats.timestamp_encoding, TimestampEncoding::Text);
        assert_eq!(n.stats.rows_dropped, 1);
    }

    #[test]
    fn split_date_and_time_columns() {
        let t = table(
            "Date,Time,Location,ToD_Period,Fire_Risk_Level\n\
             10/06/2024,18:30:00,Shed_01,Peak,high\n",
        );
        let n = normalize(&t).unwrap();
        let r = &n.meters["Shed_01"][0];
        assert_eq!(r.ts, datetime!(2024-06-10 18:30));
        assert_eq!(r.tod_tag, Some(TodPeriod::Peak));
        assert_eq!(r.fire_risk_tag, Some(Severity::High));
    }

    #[test]
    fn watt_and_watt_hour_columns_are_scaled() {
        let t = table("Timestamp,Energy_Wh,Watts_Total\n2024-06-10 12:00:00,150000,2500\n");
        let n = normalize(&t).unwrap();
        let r = &n.meters[DEFAULT_METER_ID][0];
        assert_eq!(r.cumulative_kwh, Some(150.0));
        assert_eq!(r.power_kw, Some(2.5));
        assert!(!n.columns.meter_id);
    }

    #[test]
    fn absent_optional_columns_are_named_and_run_hours_parsed() {
        let t = table("Timestamp,Location,kW_Total,Run_Hours\n2024-06-10 12:00:00,Shed_01,3,1204.5\n");
        let n = normalize(&t).unwrap();
        assert_eq!(n.meters["Shed_01"][0].run_hours, Some(1204.5));

        let absent = n.columns.absent();
        assert!(absent.contains(&"Energy_kWh"));
        assert!(absent.contains(&"PF_Avg"));
        assert!(!absent.contains(&"kW_Total"));
        assert!(!absent.contains(&"Run_Hours"));
        assert!(!absent.contains(&"Location"));
    }

    #[test]
    fn missing_timestamp_column_is_data_unavailable() {
        let t = table("Location,kW_Total\nShed_01,3\n");
        assert!(matches!(normalize(&t), Err(PipelineError::DataUnavailable(_))));
    }

    #[test]
    fn all_rows_unusable_is_data_unavailable() {
        let t = table("Timestamp,Location\nnope,Shed_01\n");
        assert!(matches!(normalize(&t), Err(PipelineError::DataUnavailable(_))));
    }
}
