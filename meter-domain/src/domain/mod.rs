pub mod anomaly;
pub mod interval;
pub mod reading;
pub mod report;
pub mod tod;

pub use anomaly::{AnomalyEvent, AnomalyMetric, Severity};
pub use interval::{ConsumptionInterval, DailyTodTotal};
pub use reading::{PhaseValues, Reading};
pub use report::*;
pub use tod::{DayType, TodPeriod, TodValues};
