use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::optics::tan_to_fp;
use crate::sky::{radec_to_tan, tangent_plane};

/// Requested tile (field) definition. Angles in degrees, epoch as MJD.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TileParams {
    /// Tile center, ICRS degrees.
    pub ra: f64,
    pub dec: f64,
    pub mjd: f64,
    /// Design hour angle of the observation.
    pub ha: f64,
    /// Requested field rotation.
    pub fieldrot_deg: f64,
    /// ADC prism rotation angles.
    pub adc1_deg: f64,
    pub adc2_deg: f64,
}

/// One science target, ICRS degrees.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SkyTarget {
    pub ra: f64,
    pub dec: f64,
}

/// Output of [`solve_pointing`].
#[derive(Clone, Debug)]
pub struct PointingSolution {
    /// Converged telescope pointing, degrees.
    pub tel_ra: f64,
    pub tel_dec: f64,
    /// Focal-plane target coordinates, mm, in input order.
    pub x_fp: Vec<f64>,
    pub y_fp: Vec<f64>,
    /// Field rotation re-measured on the delivered coordinates, degrees.
    pub fieldrot_deg: f64,
    /// Requested minus delivered field rotation, arcseconds. Diagnostic
    /// only; small residuals are expected and not gating.
    pub fieldrot_residual_arcsec: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum PointingError {
    #[error("pointing Jacobian is singular for this tile configuration")]
    SingularJacobian,
}

/// Perturbation step for the numeric Jacobian: one arcsecond.
const JACOBIAN_STEP_DEG: f64 = 1.0 / 3600.0;

/// Targets inside this focal-plane radius carry no usable rotation
/// signal and are excluded from the field-rotation estimate.
const FIELDROT_MIN_RADIUS_MM: f64 = 10.0;

struct Projector {
    tile: TileParams,
    lst_deg: f64,
}

impl Projector {
    fn project(&self, ra: f64, dec: f64, tel_ra: f64, tel_dec: f64) -> (f64, f64) {
        let (xt, yt) = radec_to_tan(ra, dec, tel_ra, tel_dec, self.tile.mjd, self.lst_deg);
        tan_to_fp(xt, yt, self.tile.adc1_deg, self.tile.adc2_deg)
    }
}

/// Mean field rotation between on-sky offsets and focal-plane offsets,
/// degrees. Uses the negated-RA hour-angle convention so the sky frame
/// matches the delivered focal-plane parity.
fn measure_fieldrot_deg(
    targets: &[SkyTarget],
    tile_ra: f64,
    tile_dec: f64,
    x_fp: &[f64],
    y_fp: &[f64],
) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (t, (&x, &y)) in targets.iter().zip(x_fp.iter().zip(y_fp)) {
        let r2 = x * x + y * y;
        if !(t.ra.is_finite() && t.dec.is_finite() && r2.is_finite()) {
            continue;
        }
        if r2 <= FIELDROT_MIN_RADIUS_MM * FIELDROT_MIN_RADIUS_MM {
            continue;
        }
        let (x2, y2) = tangent_plane(-t.ra, t.dec, -tile_ra, tile_dec);
        let cross = y * x2 - x * y2;
        let norm = (r2 * (x2 * x2 + y2 * y2)).sqrt();
        if norm > 0.0 {
            sum += cross / norm;
            count += 1;
        }
    }
    if count == 0 {
        log::warn!("no targets outside {FIELDROT_MIN_RADIUS_MM} mm, field rotation set to 0");
        return 0.0;
    }
    (sum / count as f64).to_degrees()
}

/// Solve the telescope pointing for a tile and project its targets.
///
/// The pointing starts at the tile center and is corrected in exactly two
/// Newton steps: the tile center is projected to the focal plane, a 2×2
/// Jacobian is estimated from one-arcsecond perturbations in RA and Dec,
/// and the linear system moves the pointing so the center lands on the
/// origin. Two fixed iterations assume near-linearity over the tile's
/// angular scale; the residual center offset is logged for inspection.
///
/// The delivered coordinates are then rotated so the measured field
/// rotation equals the requested one, and the rotation is re-measured as
/// a self check.
pub fn solve_pointing(
    tile: &TileParams,
    targets: &[SkyTarget],
) -> Result<PointingSolution, PointingError> {
    let projector = Projector {
        tile: *tile,
        lst_deg: tile.ha + tile.ra,
    };

    let mut tel_ra = tile.ra;
    let mut tel_dec = tile.dec;

    for _ in 0..2 {
        let (x0, y0) = projector.project(tile.ra, tile.dec, tel_ra, tel_dec);

        let (x_ra, y_ra) =
            projector.project(tile.ra + JACOBIAN_STEP_DEG, tile.dec, tel_ra, tel_dec);
        let (x_dec, y_dec) =
            projector.project(tile.ra, tile.dec + JACOBIAN_STEP_DEG, tel_ra, tel_dec);

        let jacobian = Matrix2::new(
            (x_ra - x0) / JACOBIAN_STEP_DEG,
            (x_dec - x0) / JACOBIAN_STEP_DEG,
            (y_ra - y0) / JACOBIAN_STEP_DEG,
            (y_dec - y0) / JACOBIAN_STEP_DEG,
        );
        // A degenerate projection (e.g. a pole-crossing tile) leaves the
        // determinant orders of magnitude below the Jacobian scale.
        let det = jacobian.determinant();
        if !det.is_finite() || det.abs() <= 1e-9 * jacobian.norm_squared() {
            return Err(PointingError::SingularJacobian);
        }
        let inverse = jacobian
            .try_inverse()
            .ok_or(PointingError::SingularJacobian)?;

        let correction = inverse * Vector2::new(x0, y0);
        tel_ra += correction.x;
        tel_dec += correction.y;
    }

    let (x0, y0) = projector.project(tile.ra, tile.dec, tel_ra, tel_dec);
    log::debug!("tile center lands at ({x0:.4}, {y0:.4}) mm after two corrections");

    let mut x_fp = Vec::with_capacity(targets.len());
    let mut y_fp = Vec::with_capacity(targets.len());
    for t in targets {
        let (x, y) = projector.project(t.ra, t.dec, tel_ra, tel_dec);
        x_fp.push(x);
        y_fp.push(y);
    }

    // Rotate the delivered frame onto the requested rotation convention.
    let measured = measure_fieldrot_deg(targets, tile.ra, tile.dec, &x_fp, &y_fp);
    let drot = tile.fieldrot_deg - measured;
    let (s, c) = drot.to_radians().sin_cos();
    for (x, y) in x_fp.iter_mut().zip(y_fp.iter_mut()) {
        let (rx, ry) = (c * *x - s * *y, s * *x + c * *y);
        *x = rx;
        *y = ry;
    }

    let realised = measure_fieldrot_deg(targets, tile.ra, tile.dec, &x_fp, &y_fp);
    let residual_arcsec = (tile.fieldrot_deg - realised) * 3600.0;
    log::info!(
        "requested fieldrot {:.1} arcsec, delta {:.2} arcsec",
        tile.fieldrot_deg * 3600.0,
        residual_arcsec
    );

    Ok(PointingSolution {
        tel_ra,
        tel_dec,
        x_fp,
        y_fp,
        fieldrot_deg: realised,
        fieldrot_residual_arcsec: residual_arcsec,
    })
}
