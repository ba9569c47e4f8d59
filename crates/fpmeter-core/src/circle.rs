use nalgebra::{Matrix2, Point2, Vector2};

/// Center and radius of a fitted circle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircleFit {
    pub center: Point2<f64>,
    pub radius: f64,
}

/// Errors from [`fit_circle`].
#[derive(thiserror::Error, Debug)]
pub enum CircleFitError {
    #[error("circle fit needs at least {needed} points, got {got}")]
    InsufficientPoints { needed: usize, got: usize },
    #[error("degenerate geometry: points are collinear or coincident")]
    Degenerate,
}

/// Algebraic least-squares circle fit (Kåsa method).
///
/// Minimizes the algebraic distance `sum((|p - c|^2 - r^2)^2)` which
/// reduces to a 2x2 linear solve about the centroid. There is no iterative
/// refinement; for the small residuals of positioner arcs the algebraic
/// solution is adequate.
///
/// Collinear or coincident input makes the normal equations singular and
/// returns [`CircleFitError::Degenerate`].
pub fn fit_circle(points: &[Point2<f64>]) -> Result<CircleFit, CircleFitError> {
    if points.len() < 3 {
        return Err(CircleFitError::InsufficientPoints {
            needed: 3,
            got: points.len(),
        });
    }

    let n = points.len() as f64;
    let mut mean = Vector2::zeros();
    for p in points {
        mean += p.coords;
    }
    mean /= n;

    // Moments of the centered coordinates.
    let (mut suu, mut suv, mut svv) = (0.0, 0.0, 0.0);
    let (mut suuu, mut svvv, mut suvv, mut svuu) = (0.0, 0.0, 0.0, 0.0);
    for p in points {
        let u = p.x - mean.x;
        let v = p.y - mean.y;
        suu += u * u;
        suv += u * v;
        svv += v * v;
        suuu += u * u * u;
        svvv += v * v * v;
        suvv += u * v * v;
        svuu += v * u * u;
    }

    let a = Matrix2::new(suu, suv, suv, svv);
    let b = Vector2::new(0.5 * (suuu + suvv), 0.5 * (svvv + svuu));

    // Relative determinant check: collinear points leave the scatter
    // matrix rank-deficient at the scale of its trace.
    let trace = suu + svv;
    if trace <= 0.0 || a.determinant().abs() <= 1e-12 * trace * trace {
        return Err(CircleFitError::Degenerate);
    }

    let c = a.lu().solve(&b).ok_or(CircleFitError::Degenerate)?;
    let radius = (c.norm_squared() + trace / n).sqrt();

    Ok(CircleFit {
        center: Point2::from(mean + c),
        radius,
    })
}
