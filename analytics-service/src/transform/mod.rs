//! Pure stages turning a raw table into priced consumption.
//!
//! Normalize -> reconcile -> allocate. None of these stages do I/O.

pub mod allocate;
pub mod normalize;
pub mod reconcile;

pub use allocate::{allocate_meter, allocate_site, MeterAllocation, SiteAllocation};
pub use normalize::{normalize, NormalizedTable, NormalizationStats};
pub use reconcile::{reconcile, EnergyStep, ReconciledMeter, RejectReason};
