use std::fmt;

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

/// Ordered severity tiers. Also used as the fire-risk level of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Normal,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Normal, Severity::Warning, Severity::High, Severity::Critical];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "NORMAL" => Some(Self::Normal),
            "WARNING" => Some(Self::Warning),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMetric {
    PowerFactor,
    NeutralCurrent,
}

/// A sustained excursion of one metric on one meter.
///
/// `min_value` / `max_value` / `avg_value` are over the samples in the run.
/// For fire-risk events built from tagged samples only, the values are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub meter_id: String,
    pub metric: AnomalyMetric,
    pub severity: Severity,
    pub start: PrimitiveDateTime,
    pub end: PrimitiveDateTime,
    pub sample_count: usize,
    pub duration_minutes: f64,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub avg_value: Option<f64>,
}
