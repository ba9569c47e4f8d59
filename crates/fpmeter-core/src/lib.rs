//! Core geometry for focal-plane metrology.
//!
//! This crate is intentionally small and purely numeric. It does *not*
//! depend on any table format, catalog loader or camera driver:
//!
//! - [`match_nearest`]: nearest-neighbour association between 2D point sets
//! - [`fit_circle`]: algebraic least-squares circle fit
//! - [`focal_surface`]: flat focal-plane mm ↔ curved-surface parametrization
//! - [`FvcFpTransform`]: fitted camera-pixel → focal-plane-mm transform

mod circle;
pub mod focal_surface;
mod logger;
mod match_points;
mod transform;

pub use circle::{fit_circle, CircleFit, CircleFitError};
pub use match_points::{match_nearest, NearestMatch};
pub use transform::{FitFlags, FvcFpTransform, TransformError, TransformFit};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
