//! Registration of FVC spot detections against focal-plane metrology, and
//! per-device circle aggregation over repeated exposures.
//!
//! One exposure flows through [`SpotRegistrar`], which projects raw pixel
//! detections into focal-plane mm, matches them to the metrology catalog
//! and writes expected positions back onto the table. Many registered
//! exposures then feed [`measure_circles`], which estimates each device's
//! true center from its accumulated motion trace.

pub mod circles;
mod metrology;
mod register;
mod spots;

pub use circles::{measure_circles, CircleParams, CircleReport, DeviceCircle};
pub use metrology::{compose_location, Metrology, MetrologyEntry, MetrologyError, MetrologyRow};
pub use register::{FiducialIdentifier, RegisterParams, RegisterReport, SpotRegistrar};
pub use spots::{RawSpot, SpotTable};
