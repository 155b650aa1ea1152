use std::{fmt, ops::AddAssign};

use serde::{Deserialize, Serialize};
use time::{Date, Weekday};

/// Time-of-day billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TodPeriod {
    Peak,
    Normal,
    Offpeak,
}

impl TodPeriod {
    pub const ALL: [TodPeriod; 3] = [TodPeriod::Peak, TodPeriod::Normal, TodPeriod::Offpeak];

    /// Normalize a logger tag such as `Peak`, `OFF-PEAK` or `off_peak`.
    ///
    /// Returns `None` for anything that is not one of the three periods.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let folded: String = tag
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' ' | '\'' | '"'))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match folded.as_str() {
            "PEAK" => Some(Self::Peak),
            "NORMAL" => Some(Self::Normal),
            "OFFPEAK" => Some(Self::Offpeak),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peak => "PEAK",
            Self::Normal => "NORMAL",
            Self::Offpeak => "OFFPEAK",
        }
    }
}

impl fmt::Display for TodPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per ToD period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TodValues<T> {
    pub peak: T,
    pub normal: T,
    pub offpeak: T,
}

impl<T: Copy> TodValues<T> {
    pub fn get(&self, period: TodPeriod) -> T {
        match period {
            TodPeriod::Peak => self.peak,
            TodPeriod::Normal => self.normal,
            TodPeriod::Offpeak => self.offpeak,
        }
    }

    pub fn get_mut(&mut self, period: TodPeriod) -> &mut T {
        match period {
            TodPeriod::Peak => &mut self.peak,
            TodPeriod::Normal => &mut self.normal,
            TodPeriod::Offpeak => &mut self.offpeak,
        }
    }
}

impl TodValues<f64> {
    /// Sum in fixed PEAK, NORMAL, OFFPEAK order.
    pub fn total(&self) -> f64 {
        self.peak + self.normal + self.offpeak
    }

    /// Element-wise product, e.g. energy × rate.
    pub fn times(&self, other: &TodValues<f64>) -> TodValues<f64> {
        TodValues {
            peak: self.peak * other.peak,
            normal: self.normal * other.normal,
            offpeak: self.offpeak * other.offpeak,
        }
    }
}

impl AddAssign for TodValues<f64> {
    fn add_assign(&mut self, rhs: Self) {
        self.peak += rhs.peak;
        self.normal += rhs.normal;
        self.offpeak += rhs.offpeak;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Weekday,
    Weekend,
}

impl DayType {
    pub fn of(date: Date) -> Self {
        match date.weekday() {
            Weekday::Saturday | Weekday::Sunday => Self::Weekend,
            _ => Self::Weekday,
        }
    }
}
