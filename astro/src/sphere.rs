//! Spherical-triangle solver and the Alt/Az <-> HA/Dec transform

use std::f64::consts::{FRAC_PI_2, PI};

use crate::ranges::{range24, range360, range_2pi, DEG_RAD, HRS_RAD, RAD_DEG, RAD_HRS};
use crate::types::{AltAzCoordinate, EquatorialCoordinate, SiteLocation};

/// Solve a spherical triangle.
///
/// Given angle `a_angle`, side `b`, and the cosine/sine of side `c`, returns
/// the cosine of the side opposite `a_angle` and the angle `B` opposite `b`,
/// reduced to `[0, 2π)`.
pub fn solve_sphere(a_angle: f64, b: f64, cos_c: f64, sin_c: f64) -> (f64, f64) {
    let (sb, cb) = b.sin_cos();
    let ca = (cb * cos_c + sb * sin_c * a_angle.cos()).clamp(-1.0, 1.0);

    let big_b = if sin_c < 1e-7 {
        if cos_c < 0.0 {
            a_angle
        } else {
            PI - a_angle
        }
    } else {
        let y = a_angle.sin() * sb * sin_c;
        let x = cb - ca * cos_c;
        if y != 0.0 {
            if x != 0.0 {
                y.atan2(x)
            } else if y > 0.0 {
                FRAC_PI_2
            } else {
                -FRAC_PI_2
            }
        } else if x >= 0.0 {
            0.0
        } else {
            PI
        }
    };

    (ca, range_2pi(big_b))
}

// Shared by both directions: the transform is its own inverse with the
// angle/side roles swapped.
fn aaha_aux(latitude: f64, x: f64, y: f64) -> (f64, f64) {
    let (slat, clat) = latitude.sin_cos();
    let (cap, big_b) = solve_sphere(-x, FRAC_PI_2 - y, slat, clat);
    (big_b, FRAC_PI_2 - cap.acos())
}

/// Hour angle and declination to altitude and azimuth, all radians.
/// Returns `(alt, az)`.
pub fn hadec_to_altaz(latitude: f64, ha: f64, dec: f64) -> (f64, f64) {
    let (az, alt) = aaha_aux(latitude, ha, dec);
    (alt, az)
}

/// Altitude and azimuth to hour angle and declination, all radians.
/// Returns `(ha, dec)` with `ha` in `[0, 2π)`.
pub fn altaz_to_hadec(latitude: f64, alt: f64, az: f64) -> (f64, f64) {
    aaha_aux(latitude, az, alt)
}

/// Horizontal coordinates of a sky position at a site and sidereal time
pub fn equatorial_to_altaz(
    site: &SiteLocation,
    target: &EquatorialCoordinate,
    lst: f64,
) -> AltAzCoordinate {
    let ha = (lst - target.ra()) * HRS_RAD;
    let (alt, az) = hadec_to_altaz(site.latitude * DEG_RAD, ha, target.dec() * DEG_RAD);
    AltAzCoordinate::new(alt * RAD_DEG, range360(az * RAD_DEG))
}

/// Sky position of a horizontal coordinate at a site and sidereal time
pub fn altaz_to_equatorial(
    site: &SiteLocation,
    altaz: &AltAzCoordinate,
    lst: f64,
) -> EquatorialCoordinate {
    let (ha, dec) = altaz_to_hadec(site.latitude * DEG_RAD, altaz.alt * DEG_RAD, altaz.az * DEG_RAD);
    EquatorialCoordinate::clamped(range24(lst - ha * RAD_HRS), dec * RAD_DEG)
}
