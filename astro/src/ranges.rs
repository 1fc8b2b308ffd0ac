//! Unit constants and range normalization
//!
//! The `range*` helpers wrap a scalar into a closed-open canonical interval.
//! They are used everywhere an angle may have drifted past a full turn, so
//! the rest of the math never needs to branch on wrap-around.

use std::f64::consts::PI;

/// Degrees to radians
pub const DEG_RAD: f64 = PI / 180.0;
/// Radians to degrees
pub const RAD_DEG: f64 = 180.0 / PI;
/// Hours to radians
pub const HRS_RAD: f64 = PI / 12.0;
/// Radians to hours
pub const RAD_HRS: f64 = 12.0 / PI;
/// Arcseconds to radians
pub const ARCSEC_RAD: f64 = PI / (180.0 * 3600.0);
/// Radians to arcseconds
pub const RAD_ARCSEC: f64 = (180.0 * 3600.0) / PI;

/// Sidereal tracking rate (arcsec/sec)
pub const SIDEREAL_RATE_ARCSEC: f64 = 15.041067;
/// Lunar tracking rate (arcsec/sec)
pub const LUNAR_RATE_ARCSEC: f64 = 14.511415;
/// Solar tracking rate (arcsec/sec)
pub const SOLAR_RATE_ARCSEC: f64 = 15.0;

/// Wrap `x` into `[0, ceiling)`.
///
/// `rem_euclid` can round up to exactly `ceiling` for tiny negative inputs,
/// so that case is folded back to zero.
pub fn range(x: f64, ceiling: f64) -> f64 {
    let r = x.rem_euclid(ceiling);
    if r >= ceiling {
        0.0
    } else {
        r
    }
}

/// Wrap hours into `[0, 24)`
pub fn range24(hours: f64) -> f64 {
    range(hours, 24.0)
}

/// Wrap degrees into `[0, 360)`
pub fn range360(degrees: f64) -> f64 {
    range(degrees, 360.0)
}

/// Wrap an hour angle into `[-12, 12)`
pub fn range_ha(hours: f64) -> f64 {
    range24(hours + 12.0) - 12.0
}

/// Wrap radians into `[0, 2π)`
pub fn range_2pi(radians: f64) -> f64 {
    range(radians, 2.0 * PI)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f64; 14] = [
        -1e-17, -1e9, -725.25, -360.0, -24.0, -12.0, -0.5, 0.0, 0.5, 12.0, 23.999_999, 24.0,
        359.75, 1e9,
    ];

    #[test]
    fn test_range24_interval() {
        for x in SAMPLES {
            let r = range24(x);
            assert!((0.0..24.0).contains(&r), "range24({}) = {}", x, r);
        }
        assert!((range24(25.5) - 1.5).abs() < 1e-12);
        assert!((range24(-1.0) - 23.0).abs() < 1e-12);
    }

    #[test]
    fn test_range360_interval() {
        for x in SAMPLES {
            let r = range360(x);
            assert!((0.0..360.0).contains(&r), "range360({}) = {}", x, r);
        }
        assert!((range360(-90.0) - 270.0).abs() < 1e-12);
        assert_eq!(range360(360.0), 0.0);
    }

    #[test]
    fn test_range_ha_interval() {
        for x in SAMPLES {
            let r = range_ha(x);
            assert!((-12.0..12.0).contains(&r), "range_ha({}) = {}", x, r);
        }
        assert!((range_ha(13.0) + 11.0).abs() < 1e-12);
        assert!((range_ha(-13.0) - 11.0).abs() < 1e-12);
        assert_eq!(range_ha(12.0), -12.0);
    }

    #[test]
    fn test_range_is_congruent() {
        for ceiling in [1.0, 24.0, 360.0, 2.0 * PI] {
            for x in SAMPLES {
                let r = range(x, ceiling);
                assert!((0.0..ceiling).contains(&r));
                let k = ((x - r) / ceiling).round();
                let tolerance = 1e-9 * x.abs().max(1.0);
                assert!((x - r - k * ceiling).abs() < tolerance, "x={} c={}", x, ceiling);
            }
        }
    }

    #[test]
    fn test_tiny_negative_folds_to_zero() {
        assert_eq!(range24(-1e-17), 0.0);
        assert_eq!(range_2pi(-1e-18), 0.0);
    }
}
