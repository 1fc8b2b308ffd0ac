//! Axis position <-> sky conversions
//!
//! Axis positions are absolute encoder angles in radians. The RA axis maps to
//! an "axis hour" value and the Dec axis to "axis degrees"; both conversions
//! are relative to the session's zero position and flip sign in the southern
//! hemisphere.
//!
//! Pier side is chosen from the hour angle so that the counterweights stay
//! below the RA axis in both hemispheres:
//!
//! | Hemisphere | Hour angle | Counterweights-up requested | Pier |
//! |------------|------------|-----------------------------|------|
//! | North      | HA < 0     | no                          | East |
//! | North      | HA >= 0    | no                          | West |
//! | South      | HA < 0     | no                          | East |
//! | South      | HA >= 0    | no                          | West |
//! | any        | any        | yes                         | opposite of the above |

use std::f64::consts::{FRAC_PI_2, PI};

use crate::ranges::{
    range24, range360, range_2pi, range_ha, DEG_RAD, HRS_RAD, RAD_DEG, RAD_HRS,
};
use crate::types::{AxisFrame, AxisPosition, EquatorialCoordinate, Hemisphere, PierSide};

/// Hour value of an RA axis position, `[0, 24)`
pub fn axis_hours(zero: f64, position: f64, hemisphere: Hemisphere) -> f64 {
    let offset = (position - zero) * RAD_HRS;
    let i = if position > zero { 24.0 - offset } else { -offset };

    match hemisphere {
        Hemisphere::North => range24(i + 6.0),
        Hemisphere::South => range24((24.0 - i) + 6.0),
    }
}

/// RA axis position for an axis hour value. Inverse of [`axis_hours`] for
/// positions within half a turn of zero.
pub fn axis_position_from_hours(zero: f64, hours: f64, hemisphere: Hemisphere) -> f64 {
    let h = range24(hours - 6.0);

    match hemisphere {
        Hemisphere::North => {
            if h < 12.0 {
                zero - h * HRS_RAD
            } else {
                zero + (24.0 - h) * HRS_RAD
            }
        }
        Hemisphere::South => {
            if h < 12.0 {
                zero + h * HRS_RAD
            } else {
                zero - (24.0 - h) * HRS_RAD
            }
        }
    }
}

/// Degree value of a Dec axis position, `[0, 360)`
pub fn axis_degrees(zero: f64, position: f64, hemisphere: Hemisphere) -> f64 {
    let offset = (position - zero) * RAD_DEG;
    let i = if position > zero { offset } else { 360.0 + offset };

    match hemisphere {
        Hemisphere::North => range360(i),
        Hemisphere::South => range360(360.0 - i),
    }
}

/// Dec axis position for an axis degree value.
///
/// On the east pier the axis takes the short way round (values past 180°
/// become negative offsets); on the west pier the full 180° complement is
/// kept positive.
pub fn axis_position_from_degrees(
    zero: f64,
    degrees: f64,
    pier: PierSide,
    hemisphere: Hemisphere,
) -> f64 {
    let degrees = match hemisphere {
        Hemisphere::North => degrees,
        Hemisphere::South => range360(360.0 - degrees),
    };

    if degrees > 180.0 && pier == PierSide::East {
        zero - (360.0 - degrees) * DEG_RAD
    } else {
        zero + degrees * DEG_RAD
    }
}

/// Dec axis degrees for a declination on the given pier side
pub fn dec_axis_degrees(dec: f64, pier: PierSide) -> f64 {
    let dec = dec.clamp(-90.0, 90.0);
    match pier {
        PierSide::East => range360(dec),
        PierSide::West => 180.0 - dec,
    }
}

/// Declination and pier side for a Dec axis degree value
pub fn dec_from_axis_degrees(degrees: f64) -> (f64, PierSide) {
    let degrees = range360(degrees);
    if degrees > 90.0 && degrees <= 270.0 {
        (180.0 - degrees, PierSide::West)
    } else if degrees > 270.0 {
        (degrees - 360.0, PierSide::East)
    } else {
        (degrees, PierSide::East)
    }
}

/// Target Dec axis position for a declination
pub fn dec_axis_position_from_dec(
    dec: f64,
    pier: PierSide,
    zero: f64,
    hemisphere: Hemisphere,
) -> f64 {
    axis_position_from_degrees(zero, dec_axis_degrees(dec, pier), pier, hemisphere)
}

fn flipped(dec_axis_degrees: f64) -> bool {
    let d = range360(dec_axis_degrees);
    d > 90.0 && d <= 270.0
}

/// Target RA axis position for a right ascension.
///
/// `dec_axis_degrees` is the Dec axis value the target will be reached with;
/// a flipped Dec axis (west pier) puts the RA axis 12 hours round. `lst` is
/// the local sidereal time in hours.
pub fn ra_axis_position_from_ra(
    ra: f64,
    dec_axis_degrees: f64,
    lst: f64,
    zero: f64,
    hemisphere: Hemisphere,
) -> f64 {
    let mut i = ra - lst;
    if flipped(dec_axis_degrees) {
        match hemisphere {
            Hemisphere::North => i -= 12.0,
            Hemisphere::South => i += 12.0,
        }
    }
    axis_position_from_hours(zero, range24(i), hemisphere)
}

/// Right ascension (hours) of an RA axis position
pub fn ra_from_axis_position(
    position: f64,
    dec_axis_degrees: f64,
    lst: f64,
    zero: f64,
    hemisphere: Hemisphere,
) -> f64 {
    let mut h = axis_hours(zero, position, hemisphere);
    if flipped(dec_axis_degrees) {
        match hemisphere {
            Hemisphere::North => h += 12.0,
            Hemisphere::South => h -= 12.0,
        }
    }
    range24(h + lst)
}

/// Hour angle in `[-12, 12)` for a right ascension at a sidereal time
pub fn hour_angle(ra: f64, lst: f64) -> f64 {
    range_ha(lst - ra)
}

/// Pier side for a target hour angle; see the module table
pub fn pier_side_for_hour_angle(hour_angle: f64, counterweight_up: bool) -> PierSide {
    let normal = if hour_angle < 0.0 {
        PierSide::East
    } else {
        PierSide::West
    };
    if counterweight_up {
        normal.opposite()
    } else {
        normal
    }
}

/// Signed RA offset from zero, wrapped to `(-π, π]`
pub fn ra_offset(zero: f64, position: f64) -> f64 {
    let d = range_2pi(position - zero);
    if d > PI {
        d - 2.0 * PI
    } else {
        d
    }
}

/// True when the RA axis has the counterweights above the axis
pub fn is_counterweight_up(zero: f64, position: f64) -> bool {
    ra_offset(zero, position).abs() > FRAC_PI_2
}

/// Axis positions for a sky target on a chosen pier side
pub fn equatorial_to_axis(
    frame: &AxisFrame,
    target: &EquatorialCoordinate,
    lst: f64,
    pier: PierSide,
) -> AxisPosition {
    let dec_deg = dec_axis_degrees(target.dec(), pier);
    AxisPosition {
        ra: ra_axis_position_from_ra(target.ra(), dec_deg, lst, frame.zero.ra, frame.hemisphere),
        dec: dec_axis_position_from_dec(target.dec(), pier, frame.zero.dec, frame.hemisphere),
    }
}

/// Sky coordinate and pier side for a pair of axis positions
pub fn axis_to_equatorial(
    frame: &AxisFrame,
    position: &AxisPosition,
    lst: f64,
) -> (EquatorialCoordinate, PierSide) {
    let dec_deg = axis_degrees(frame.zero.dec, position.dec, frame.hemisphere);
    let (dec, pier) = dec_from_axis_degrees(dec_deg);
    let ra = ra_from_axis_position(position.ra, dec_deg, lst, frame.zero.ra, frame.hemisphere);
    (EquatorialCoordinate::clamped(ra, dec), pier)
}
