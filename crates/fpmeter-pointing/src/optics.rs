//! Tangent plane → focal plane optics model.
//!
//! The corrector maps field angle to focal-plane radius through an odd
//! radial polynomial (the plate scale grows toward the field edge), and
//! the two ADC prisms each add a small lateral image displacement along
//! their rotation angle. The displacement is what pulls the tile center
//! off the origin and makes the pointing solve necessary.

/// Radial plate-scale polynomial, mm per radian of field angle.
const PLATE_C1: f64 = 14500.0;
const PLATE_C3: f64 = 3.0e5;
const PLATE_C5: f64 = 1.0e8;

/// Lateral image displacement per ADC prism, mm.
pub const ADC_DEFLECTION_MM: f64 = 0.75;

/// Field angle (radians) → focal-plane radius (mm).
fn field_angle_to_radius(theta: f64) -> f64 {
    let t2 = theta * theta;
    theta * (PLATE_C1 + t2 * (PLATE_C3 + t2 * PLATE_C5))
}

/// Project tangent-plane coordinates (radians) to focal-plane mm under
/// the given ADC prism angles (degrees).
pub fn tan_to_fp(x_tan: f64, y_tan: f64, adc1_deg: f64, adc2_deg: f64) -> (f64, f64) {
    let theta = x_tan.hypot(y_tan);
    // radius/theta tends to the axial plate scale at the field center.
    let scale = if theta > 0.0 {
        field_angle_to_radius(theta) / theta
    } else {
        PLATE_C1
    };

    let (s1, c1) = adc1_deg.to_radians().sin_cos();
    let (s2, c2) = adc2_deg.to_radians().sin_cos();
    let dx = ADC_DEFLECTION_MM * (c1 + c2);
    let dy = ADC_DEFLECTION_MM * (s1 + s2);

    (scale * x_tan + dx, scale * y_tan + dy)
}
