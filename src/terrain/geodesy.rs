//! WGS-84 coordinate conversions and barycentric altitude interpolation.

use glam::{DVec2, DVec3};

/// WGS-84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 first eccentricity squared.
pub const WGS84_E2: f64 = 6.694_379_990_14e-3;

/// Geodetic `(lat, lon)` in degrees + altitude in meters to ECEF meters.
pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, alt_m: f64) -> DVec3 {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let sin_lat = lat.sin();
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    DVec3::new(
        (n + alt_m) * lat.cos() * lon.cos(),
        (n + alt_m) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_E2) + alt_m) * sin_lat,
    )
}

/// ECEF meters to geodetic `(lat_deg, lon_deg, alt_m)`.
///
/// Iterative inverse; converges to sub-millimeter in a handful of rounds
/// for points near the surface.
pub fn ecef_to_geodetic(ecef: DVec3) -> (f64, f64, f64) {
    let lon = ecef.y.atan2(ecef.x);
    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();

    if p < 1e-9 {
        // On the polar axis.
        let lat = if ecef.z >= 0.0 {
            std::f64::consts::FRAC_PI_2
        } else {
            -std::f64::consts::FRAC_PI_2
        };
        let b = WGS84_A * (1.0 - WGS84_E2).sqrt();
        return (lat.to_degrees(), lon.to_degrees(), ecef.z.abs() - b);
    }

    let mut lat = ecef.z.atan2(p * (1.0 - WGS84_E2));
    let mut alt = 0.0;
    for _ in 0..6 {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        alt = p / lat.cos() - n;
        lat = ecef.z.atan2(p * (1.0 - WGS84_E2 * n / (n + alt)));
    }
    (lat.to_degrees(), lon.to_degrees(), alt)
}

/// Barycentric coordinates of `p` within triangle `(a, b, c)`, or `None`
/// when the point lies outside (with a small tolerance for edge hits).
pub fn barycentric(p: DVec2, a: DVec2, b: DVec2, c: DVec2) -> Option<(f64, f64, f64)> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let den = v0.x * v1.y - v1.x * v0.y;
    if den.abs() < 1e-30 {
        return None;
    }
    let v = (v2.x * v1.y - v1.x * v2.y) / den;
    let w = (v0.x * v2.y - v2.x * v0.y) / den;
    let u = 1.0 - v - w;
    const EPS: f64 = -1e-9;
    if u >= EPS && v >= EPS && w >= EPS {
        Some((u, v, w))
    } else {
        None
    }
}
