use nalgebra::{Complex, DMatrix, DVector, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// FVC pixel frame normalization: pixels are mapped to roughly [-1, 1]
/// before any fitting so the polynomial basis stays well conditioned.
const PIX_CENTER: f64 = 3000.0;
const PIX_SCALE: f64 = 3000.0;

/// Field radius used to normalize focal-plane mm for the correction basis.
const FIELD_RADIUS_MM: f64 = 420.0;

const POLY_BASIS_LEN: usize = 9;

/// Monomial basis through cubic order, constant term excluded (the
/// similarity offset already carries it).
fn poly_basis(u: f64, v: f64) -> [f64; POLY_BASIS_LEN] {
    [
        u,
        v,
        u * u,
        u * v,
        v * v,
        u * u * u,
        u * u * v,
        u * v * v,
        v * v * v,
    ]
}

/// Fixed-basis polynomial correction applied after the similarity part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolyCorrection {
    cx: [f64; POLY_BASIS_LEN],
    cy: [f64; POLY_BASIS_LEN],
}

impl PolyCorrection {
    fn eval(&self, p: Point2<f64>) -> Vector2<f64> {
        let b = poly_basis(p.x / FIELD_RADIUS_MM, p.y / FIELD_RADIUS_MM);
        let mut dx = 0.0;
        let mut dy = 0.0;
        for k in 0..POLY_BASIS_LEN {
            dx += self.cx[k] * b[k];
            dy += self.cy[k] * b[k];
        }
        Vector2::new(dx, dy)
    }
}

/// Which parameters a [`FvcFpTransform::fit`] call may move.
///
/// A fixed parameter keeps its current value; fixing scale and/or rotation
/// stabilizes the fit when the matched set is small or nearly degenerate.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FitFlags {
    pub fixed_scale: bool,
    pub fixed_rotation: bool,
    /// Also fit the polynomial distortion correction.
    pub fit_poly: bool,
}

/// Quality of one fit pass.
#[derive(Clone, Copy, Debug)]
pub struct TransformFit {
    /// Root-mean-square residual of the full forward model, mm.
    pub rms: f64,
    pub n_points: usize,
}

/// Errors from [`FvcFpTransform::fit`].
#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("transform fit needs at least {needed} matched points, got {got}")]
    InsufficientPoints { needed: usize, got: usize },
    #[error("pixel and mm slices differ in length ({pixels} vs {mm})")]
    MismatchedInputs { pixels: usize, mm: usize },
}

/// Parametric FVC pixel → focal-plane mm transform.
///
/// The model is a similarity (rotation, isotropic scale, offset) on
/// normalized pixel coordinates, optionally followed by a fixed-basis
/// polynomial correction that absorbs residual camera distortion:
///
/// `mm = S(pix) + P(S(pix))`
///
/// One transform is owned per calibration session and refit as matched
/// points accrue; [`FvcFpTransform::apply`] and [`FvcFpTransform::invert`]
/// round-trip to numerical tolerance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FvcFpTransform {
    /// Rotation of the camera frame against the focal plane, radians.
    rotation: f64,
    /// Normalized-pixel → mm scale.
    scale: f64,
    offset: Vector2<f64>,
    poly: Option<PolyCorrection>,
}

impl Default for FvcFpTransform {
    /// Nominal prior: camera axes aligned with the focal plane and the
    /// full field filling the detector.
    fn default() -> Self {
        Self {
            rotation: 0.0,
            scale: FIELD_RADIUS_MM,
            offset: Vector2::zeros(),
            poly: None,
        }
    }
}

fn normalize_pix(p: Point2<f64>) -> Complex<f64> {
    Complex::new((p.x - PIX_CENTER) / PIX_SCALE, (p.y - PIX_CENTER) / PIX_SCALE)
}

fn denormalize_pix(z: Complex<f64>) -> Point2<f64> {
    Point2::new(z.re * PIX_SCALE + PIX_CENTER, z.im * PIX_SCALE + PIX_CENTER)
}

impl FvcFpTransform {
    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> Vector2<f64> {
        self.offset
    }

    pub fn has_poly_correction(&self) -> bool {
        self.poly.is_some()
    }

    fn alpha(&self) -> Complex<f64> {
        Complex::from_polar(self.scale, self.rotation)
    }

    /// Similarity part only: normalized pixel → mm.
    fn similarity(&self, z: Complex<f64>) -> Point2<f64> {
        let w = self.alpha() * z;
        Point2::new(w.re + self.offset.x, w.im + self.offset.y)
    }

    /// Forward transform: FVC pixel → focal-plane mm.
    pub fn apply(&self, pix: Point2<f64>) -> Point2<f64> {
        let m0 = self.similarity(normalize_pix(pix));
        match &self.poly {
            Some(poly) => m0 + poly.eval(m0),
            None => m0,
        }
    }

    /// Forward transform over a slice.
    pub fn apply_many(&self, pix: &[Point2<f64>]) -> Vec<Point2<f64>> {
        pix.iter().map(|&p| self.apply(p)).collect()
    }

    /// Inverse transform: focal-plane mm → FVC pixel.
    ///
    /// The polynomial term is removed by fixed-point iteration; it is a
    /// small correction, so a handful of passes reaches float tolerance.
    pub fn invert(&self, mm: Point2<f64>) -> Point2<f64> {
        let m0 = match &self.poly {
            Some(poly) => {
                let mut m0 = mm;
                for _ in 0..6 {
                    m0 = mm - poly.eval(m0);
                }
                m0
            }
            None => mm,
        };
        let w = Complex::new(m0.x - self.offset.x, m0.y - self.offset.y);
        denormalize_pix(w / self.alpha())
    }

    /// Fit the transform to matched (pixel, mm) pairs by least squares.
    ///
    /// The similarity part has a closed-form complex least-squares
    /// solution; the optional polynomial correction is then fit linearly
    /// on the residuals. Mild ill-conditioning shows up as a large
    /// [`TransformFit::rms`] rather than an error; the only hard failures
    /// are mismatched inputs and too few points for the active model.
    pub fn fit(
        &mut self,
        pixels: &[Point2<f64>],
        mm: &[Point2<f64>],
        flags: FitFlags,
    ) -> Result<TransformFit, TransformError> {
        if pixels.len() != mm.len() {
            return Err(TransformError::MismatchedInputs {
                pixels: pixels.len(),
                mm: mm.len(),
            });
        }

        // 4 similarity parameters, plus two coefficient sets for the
        // polynomial; each matched point contributes two equations.
        let n_params = 4 + if flags.fit_poly { 2 * POLY_BASIS_LEN } else { 0 };
        let needed = (n_params + 1) / 2;
        if pixels.len() < needed {
            return Err(TransformError::InsufficientPoints {
                needed,
                got: pixels.len(),
            });
        }

        let n = pixels.len() as f64;
        let z: Vec<Complex<f64>> = pixels.iter().map(|&p| normalize_pix(p)).collect();
        let w: Vec<Complex<f64>> = mm.iter().map(|p| Complex::new(p.x, p.y)).collect();

        let z_mean = z.iter().sum::<Complex<f64>>() / n;
        let w_mean = w.iter().sum::<Complex<f64>>() / n;

        let mut cross = Complex::new(0.0, 0.0);
        let mut denom = 0.0;
        for (zi, wi) in z.iter().zip(&w) {
            let dz = zi - z_mean;
            cross += (wi - w_mean) * dz.conj();
            denom += dz.norm_sqr();
        }

        if denom > 1e-12 {
            match (flags.fixed_scale, flags.fixed_rotation) {
                (false, false) => {
                    let alpha = cross / denom;
                    self.scale = alpha.norm();
                    self.rotation = alpha.arg();
                }
                (true, false) => {
                    self.rotation = cross.arg();
                }
                (false, true) => {
                    self.scale = (cross * Complex::from_polar(1.0, -self.rotation)).re / denom;
                }
                (true, true) => {}
            }
        } else {
            // All sources coincide: rotation and scale are unobservable,
            // keep the current values and refit the offset only.
            log::debug!("transform fit: zero pixel scatter, refitting offset only");
        }

        let beta = w_mean - self.alpha() * z_mean;
        self.offset = Vector2::new(beta.re, beta.im);

        if flags.fit_poly {
            self.fit_poly_correction(&z, mm);
        }

        let mut sq_sum = 0.0;
        for (&p, &q) in pixels.iter().zip(mm) {
            sq_sum += (self.apply(p) - q).norm_squared();
        }
        let fit = TransformFit {
            rms: (sq_sum / n).sqrt(),
            n_points: pixels.len(),
        };
        log::debug!(
            "transform fit: n={} rms={:.4} mm scale={:.3} rot={:.5} rad",
            fit.n_points,
            fit.rms,
            self.scale,
            self.rotation
        );
        Ok(fit)
    }

    /// Linear least-squares fit of the correction basis on the residuals
    /// left by the similarity part.
    fn fit_poly_correction(&mut self, z: &[Complex<f64>], mm: &[Point2<f64>]) {
        let n = z.len();
        let mut a = DMatrix::<f64>::zeros(n, POLY_BASIS_LEN);
        let mut rx = DVector::<f64>::zeros(n);
        let mut ry = DVector::<f64>::zeros(n);

        for (i, (&zi, &mi)) in z.iter().zip(mm).enumerate() {
            let m0 = self.similarity(zi);
            let b = poly_basis(m0.x / FIELD_RADIUS_MM, m0.y / FIELD_RADIUS_MM);
            for k in 0..POLY_BASIS_LEN {
                a[(i, k)] = b[k];
            }
            rx[i] = mi.x - m0.x;
            ry[i] = mi.y - m0.y;
        }

        let svd = a.svd(true, true);
        // Truncate relative to the largest singular value: clustered
        // pinholes leave some basis directions unconstrained, and those
        // must not blow up from numerical residue.
        let eps = svd.singular_values.max() * 1e-8;
        let (cx, cy) = match (svd.solve(&rx, eps), svd.solve(&ry, eps)) {
            (Ok(cx), Ok(cy)) => (cx, cy),
            _ => {
                log::warn!("polynomial correction fit is rank deficient, keeping previous terms");
                return;
            }
        };

        let mut corr = PolyCorrection {
            cx: [0.0; POLY_BASIS_LEN],
            cy: [0.0; POLY_BASIS_LEN],
        };
        for k in 0..POLY_BASIS_LEN {
            corr.cx[k] = cx[k];
            corr.cy[k] = cy[k];
        }
        self.poly = Some(corr);
    }

    /// Serialize the fitted state (the calibration session persists it).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ground_truth() -> FvcFpTransform {
        FvcFpTransform {
            rotation: 0.2,
            scale: 415.0,
            offset: Vector2::new(1.5, -2.25),
            poly: None,
        }
    }

    fn pixel_grid() -> Vec<Point2<f64>> {
        let mut pts = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                pts.push(Point2::new(
                    500.0 + i as f64 * 1000.0,
                    500.0 + j as f64 * 1000.0,
                ));
            }
        }
        pts
    }

    /// Deterministic sub-micron jitter, different per index and axis.
    fn jitter(i: usize, axis: u32) -> f64 {
        let t = (i as f64 * 12.9898 + axis as f64 * 78.233).sin() * 43758.5453;
        (t.fract() - 0.5) * 2e-3
    }

    #[test]
    fn apply_invert_round_trips() {
        let t = ground_truth();
        for &p in &pixel_grid() {
            let back = t.invert(t.apply(p));
            assert_relative_eq!(back.x, p.x, epsilon = 1e-9);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn fit_recovers_known_parameters() {
        let truth = ground_truth();
        let pixels = pixel_grid();
        let mm: Vec<_> = pixels.iter().map(|&p| truth.apply(p)).collect();

        let mut t = FvcFpTransform::default();
        let fit = t.fit(&pixels, &mm, FitFlags::default()).expect("enough points");

        assert_relative_eq!(t.rotation(), truth.rotation, epsilon = 1e-12);
        assert_relative_eq!(t.scale(), truth.scale, epsilon = 1e-9);
        assert_relative_eq!(t.offset().x, truth.offset.x, epsilon = 1e-9);
        assert_relative_eq!(t.offset().y, truth.offset.y, epsilon = 1e-9);
        assert!(fit.rms < 1e-9);
    }

    #[test]
    fn fit_tolerates_noise() {
        let truth = ground_truth();
        let pixels = pixel_grid();
        let mm: Vec<_> = pixels
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let q = truth.apply(p);
                Point2::new(q.x + jitter(i, 0), q.y + jitter(i, 1))
            })
            .collect();

        let mut t = FvcFpTransform::default();
        let fit = t.fit(&pixels, &mm, FitFlags::default()).expect("enough points");

        // Noise-scaled tolerance: jitter is ~1e-3 mm.
        assert_relative_eq!(t.rotation(), truth.rotation, epsilon = 1e-5);
        assert_relative_eq!(t.scale(), truth.scale, epsilon = 1e-2);
        assert!(fit.rms < 5e-3);
    }

    #[test]
    fn fixed_flags_hold_parameters() {
        let truth = ground_truth();
        let pixels = pixel_grid();
        let mm: Vec<_> = pixels.iter().map(|&p| truth.apply(p)).collect();

        let mut t = FvcFpTransform::default();
        let prior_scale = t.scale();
        t.fit(
            &pixels,
            &mm,
            FitFlags {
                fixed_scale: true,
                ..FitFlags::default()
            },
        )
        .expect("enough points");
        assert_eq!(t.scale(), prior_scale);
        assert_relative_eq!(t.rotation(), truth.rotation, epsilon = 1e-12);

        let mut t = FvcFpTransform::default();
        t.fit(
            &pixels,
            &mm,
            FitFlags {
                fixed_rotation: true,
                ..FitFlags::default()
            },
        )
        .expect("enough points");
        assert_eq!(t.rotation(), 0.0);
    }

    #[test]
    fn poly_correction_absorbs_distortion() {
        let truth = ground_truth();
        let pixels = pixel_grid();
        // Add a smooth cubic distortion on top of the similarity.
        let mm: Vec<_> = pixels
            .iter()
            .map(|&p| {
                let q = truth.apply(p);
                let u = q.x / FIELD_RADIUS_MM;
                let v = q.y / FIELD_RADIUS_MM;
                Point2::new(q.x + 0.05 * u * u - 0.02 * u * v, q.y + 0.04 * v * v * v)
            })
            .collect();

        let mut plain = FvcFpTransform::default();
        let plain_fit = plain.fit(&pixels, &mm, FitFlags::default()).unwrap();

        let mut corrected = FvcFpTransform::default();
        let corrected_fit = corrected
            .fit(
                &pixels,
                &mm,
                FitFlags {
                    fit_poly: true,
                    ..FitFlags::default()
                },
            )
            .unwrap();

        assert!(corrected_fit.rms < plain_fit.rms / 10.0);
        assert!(corrected_fit.rms < 2e-3);

        // Round trip still holds with the iterative poly inverse.
        for &p in &pixels {
            let back = corrected.invert(corrected.apply(p));
            assert_relative_eq!(back.x, p.x, epsilon = 1e-6);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn insufficient_points_error() {
        let mut t = FvcFpTransform::default();
        let pixels = [Point2::new(0.0, 0.0)];
        let mm = [Point2::new(0.0, 0.0)];
        assert!(matches!(
            t.fit(&pixels, &mm, FitFlags::default()),
            Err(TransformError::InsufficientPoints { needed: 2, got: 1 })
        ));

        let pixels = pixel_grid();
        let mm: Vec<_> = pixels.iter().map(|&p| t.apply(p)).collect();
        assert!(t
            .fit(
                &pixels[..8],
                &mm[..8],
                FitFlags {
                    fit_poly: true,
                    ..FitFlags::default()
                },
            )
            .is_err());
    }

    #[test]
    fn json_round_trip_preserves_behaviour() {
        let truth = ground_truth();
        let pixels = pixel_grid();
        let mm: Vec<_> = pixels.iter().map(|&p| truth.apply(p)).collect();

        let mut t = FvcFpTransform::default();
        t.fit(
            &pixels,
            &mm,
            FitFlags {
                fit_poly: true,
                ..FitFlags::default()
            },
        )
        .unwrap();

        let json = t.to_json().expect("serializable");
        let restored = FvcFpTransform::from_json(&json).expect("parseable");
        for &p in &pixels {
            let a = t.apply(p);
            let b = restored.apply(p);
            assert_relative_eq!(a.x, b.x, epsilon = 1e-12);
            assert_relative_eq!(a.y, b.y, epsilon = 1e-12);
        }
    }
}
