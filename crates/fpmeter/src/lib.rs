//! High-level facade crate for the `fpmeter-*` workspace.
//!
//! This crate provides:
//! - stable, convenient re-exports of the underlying crates
//! - an end-to-end helper that registers a batch of exposures and
//!   aggregates per-device circle fits
//!
//! ## API map
//! - [`core`]: point matching, circle fits, the focal-surface warp and
//!   the FVC→focal-plane transform.
//! - [`register`]: the spot table, metrology catalog, per-exposure
//!   registration and circle aggregation.
//! - [`pointing`]: sky→focal-plane projection and the pointing /
//!   field-rotation solver.
//!
//! Spot extraction, fiducial-pattern heuristics, and all file I/O live
//! with the instrument pipeline, not here; see the
//! [`register::FiducialIdentifier`] seam.

pub use fpmeter_core as core;
pub use fpmeter_pointing as pointing;
pub use fpmeter_register as register;

pub use fpmeter_core::{fit_circle, match_nearest, FvcFpTransform};
pub use fpmeter_pointing::{solve_pointing, SkyTarget, TileParams};
pub use fpmeter_register::{measure_circles, Metrology, SpotRegistrar, SpotTable};

pub mod batch;
