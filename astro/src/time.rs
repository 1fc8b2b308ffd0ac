//! Julian day and sidereal time

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::ranges::{range24, range360, DEG_RAD};

/// Julian day number of J2000.0
pub const J2000: f64 = 2451545.0;

/// Julian day (UT) for a UTC instant
pub fn julian_day(dt: &DateTime<Utc>) -> f64 {
    let year = dt.year();
    let month = dt.month();
    let day = dt.day();

    let (y, m) = if month <= 2 {
        (year - 1, month + 12)
    } else {
        (year, month)
    };

    let a = y / 100;
    let b = 2 - a + a / 4;

    let jd = (365.25 * (y as f64 + 4716.0)).floor()
        + (30.6001 * (m as f64 + 1.0)).floor()
        + day as f64
        + b as f64
        - 1524.5;

    let seconds = dt.hour() as f64 * 3600.0
        + dt.minute() as f64 * 60.0
        + dt.second() as f64
        + dt.nanosecond() as f64 * 1e-9;

    jd + seconds / 86400.0
}

/// Greenwich mean sidereal time in hours, `[0, 24)`
pub fn greenwich_mean_sidereal_time(jd: f64) -> f64 {
    let t = (jd - J2000) / 36525.0;

    // Greenwich Mean Sidereal Time in degrees
    let gmst = 280.46061837 + 360.98564736629 * (jd - J2000) + 0.000387933 * t * t
        - t * t * t / 38710000.0;

    range360(gmst) / 15.0
}

/// Equation of the equinoxes in hours (nutation in longitude projected onto
/// the equator). Low precision, good to about 0.1 s of time.
pub fn equation_of_equinoxes(jd: f64) -> f64 {
    let t = (jd - J2000) / 36525.0;

    let omega = (125.04452 - 1934.136261 * t) * DEG_RAD;
    let l_sun = (280.4665 + 36000.7698 * t) * DEG_RAD;
    let l_moon = (218.3165 + 481267.8813 * t) * DEG_RAD;
    let obliquity = (23.4393 - 0.0130 * t) * DEG_RAD;

    // arcseconds
    let delta_psi = -17.20 * omega.sin() - 1.32 * (2.0 * l_sun).sin() - 0.23 * (2.0 * l_moon).sin()
        + 0.21 * (2.0 * omega).sin();

    delta_psi * obliquity.cos() / 15.0 / 3600.0
}

/// Local sidereal time in hours from a Julian day and an east-positive
/// longitude in degrees
pub fn local_sidereal_time(jd: f64, longitude: f64) -> f64 {
    range24(greenwich_mean_sidereal_time(jd) + equation_of_equinoxes(jd) + longitude / 15.0)
}

/// Local apparent sidereal time in hours, `[0, 24)`
pub fn local_apparent_sidereal_time(longitude: f64, utc: &DateTime<Utc>) -> f64 {
    local_sidereal_time(julian_day(utc), longitude)
}
