//! Flat focal-plane mm ↔ curved-focal-surface parametrization.
//!
//! The focal surface is curved; a positioner sweeping a physical circle on
//! that surface projects onto the flat (x, y) plane as a slightly squashed
//! ellipse. Circle fits are therefore done in the curved parametrization
//! `(u, v) = s·(cos θ, sin θ)`, where `θ` is the flat polar angle and `s`
//! the arc length along the surface meridian, and the fitted center is
//! mapped back afterwards.
//!
//! The surface is modelled as a spherical cap, which keeps the arc-length
//! map and its inverse in closed form.

use nalgebra::Point2;

/// Radius of curvature of the focal surface, mm.
pub const FOCAL_SURFACE_RADIUS_MM: f64 = 4500.0;

/// Flat radius → arc length along the surface meridian.
pub fn radius_to_arc(r: f64) -> f64 {
    let x = (r / FOCAL_SURFACE_RADIUS_MM).clamp(-1.0, 1.0);
    FOCAL_SURFACE_RADIUS_MM * x.asin()
}

/// Arc length along the surface meridian → flat radius.
pub fn arc_to_radius(s: f64) -> f64 {
    FOCAL_SURFACE_RADIUS_MM * (s / FOCAL_SURFACE_RADIUS_MM).sin()
}

/// Flat focal-plane (x, y) mm → curved-surface (u, v).
pub fn xy_to_curved(p: Point2<f64>) -> Point2<f64> {
    let r = p.coords.norm();
    if r == 0.0 {
        return Point2::origin();
    }
    let s = radius_to_arc(r);
    Point2::from(p.coords * (s / r))
}

/// Curved-surface (u, v) → flat focal-plane (x, y) mm.
pub fn curved_to_xy(p: Point2<f64>) -> Point2<f64> {
    let s = p.coords.norm();
    if s == 0.0 {
        return Point2::origin();
    }
    let r = arc_to_radius(s);
    Point2::from(p.coords * (r / s))
}
