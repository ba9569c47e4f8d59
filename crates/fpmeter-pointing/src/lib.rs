//! Sky → focal-plane projection and the telescope pointing solver.
//!
//! Given a tile (field) definition, [`solve_pointing`] finds the telescope
//! (RA, Dec) that puts the tile center at the focal-plane origin despite
//! the lateral deflection of the atmospheric dispersion corrector, then
//! projects the tile's targets and trims the focal-plane frame to the
//! requested field-rotation convention.

mod optics;
mod sky;
mod solver;

pub use optics::{tan_to_fp, ADC_DEFLECTION_MM};
pub use sky::{precession_matrix, radec_to_tan, tangent_plane};
pub use solver::{solve_pointing, PointingError, PointingSolution, SkyTarget, TileParams};
