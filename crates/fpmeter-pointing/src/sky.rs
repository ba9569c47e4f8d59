//! Celestial geometry: precession and the gnomonic tangent projection.

use nalgebra::{Matrix3, Vector3};

/// J2000.0 reference epoch, MJD.
const MJD_J2000: f64 = 51544.5;

fn unit_vector(lon_deg: f64, lat_deg: f64) -> Vector3<f64> {
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
}

fn lon_lat_deg(v: &Vector3<f64>) -> (f64, f64) {
    let lon = v.y.atan2(v.x).to_degrees();
    let lat = (v.z / v.norm()).asin().to_degrees();
    (lon, lat)
}

fn rot_z(angle_rad: f64) -> Matrix3<f64> {
    let (s, c) = angle_rad.sin_cos();
    Matrix3::new(c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0)
}

fn rot_y(angle_rad: f64) -> Matrix3<f64> {
    let (s, c) = angle_rad.sin_cos();
    Matrix3::new(c, 0.0, -s, 0.0, 1.0, 0.0, s, 0.0, c)
}

/// Precession rotation from J2000.0 mean equinox to the mean equinox of
/// date (IAU 1976 zeta/z/theta polynomials).
pub fn precession_matrix(mjd: f64) -> Matrix3<f64> {
    let t = (mjd - MJD_J2000) / 36525.0;
    let arcsec = |a: f64| (a / 3600.0).to_radians();

    let zeta = arcsec(2306.2181 * t + 0.30188 * t * t + 0.017998 * t * t * t);
    let z = arcsec(2306.2181 * t + 1.09468 * t * t + 0.018203 * t * t * t);
    let theta = arcsec(2004.3109 * t - 0.42665 * t * t - 0.041833 * t * t * t);

    rot_z(-z) * rot_y(theta) * rot_z(-zeta)
}

/// Gnomonic projection of (ha, dec) about the pole (ha0, dec0), both in
/// degrees. Returns tangent-plane coordinates in radians, x toward
/// increasing hour angle, y toward the north celestial pole.
pub fn tangent_plane(ha_deg: f64, dec_deg: f64, ha0_deg: f64, dec0_deg: f64) -> (f64, f64) {
    let dh = (ha_deg - ha0_deg).to_radians();
    let (sin_dec, cos_dec) = dec_deg.to_radians().sin_cos();
    let (sin_dec0, cos_dec0) = dec0_deg.to_radians().sin_cos();
    let (sin_dh, cos_dh) = dh.sin_cos();

    let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dh;
    let x = cos_dec * sin_dh / denom;
    let y = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dh) / denom;
    (x, y)
}

/// Project catalog (RA, Dec) onto the tangent plane about the telescope
/// pointing, degrees in, radians out.
///
/// Both the target and the pointing are precessed from J2000.0 to the
/// equinox of date before the hour-angle conversion `ha = lst − ra`.
pub fn radec_to_tan(
    ra_deg: f64,
    dec_deg: f64,
    tel_ra_deg: f64,
    tel_dec_deg: f64,
    mjd: f64,
    lst_deg: f64,
) -> (f64, f64) {
    let p = precession_matrix(mjd);

    let (ra_date, dec_date) = lon_lat_deg(&(p * unit_vector(ra_deg, dec_deg)));
    let (tel_ra_date, tel_dec_date) = lon_lat_deg(&(p * unit_vector(tel_ra_deg, tel_dec_deg)));

    let ha = lst_deg - ra_date;
    let tel_ha = lst_deg - tel_ra_date;
    tangent_plane(ha, dec_date, tel_ha, tel_dec_date)
}
