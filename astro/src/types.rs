//! Value types shared by the coordinate math and the mount controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

use crate::error::{AstroError, AstroResult};

/// Absolute encoder angles (radians) of the RA and Dec axes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisPosition {
    pub ra: f64,
    pub dec: f64,
}

impl AxisPosition {
    pub const fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// Largest per-axis absolute difference, in radians
    pub fn max_abs_diff(&self, other: &AxisPosition) -> f64 {
        (self.ra - other.ra).abs().max((self.dec - other.dec).abs())
    }
}

impl Add for AxisPosition {
    type Output = AxisPosition;

    fn add(self, rhs: AxisPosition) -> AxisPosition {
        AxisPosition::new(self.ra + rhs.ra, self.dec + rhs.dec)
    }
}

impl Sub for AxisPosition {
    type Output = AxisPosition;

    fn sub(self, rhs: AxisPosition) -> AxisPosition {
        AxisPosition::new(self.ra - rhs.ra, self.dec - rhs.dec)
    }
}

impl fmt::Display for AxisPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(ra={:.6} rad, dec={:.6} rad)", self.ra, self.dec)
    }
}

/// Right ascension (hours) and declination (degrees)
///
/// Only constructed through [`EquatorialCoordinate::new`], so a value in hand
/// is always in range. Deserialization goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedEquatorial")]
pub struct EquatorialCoordinate {
    ra: f64,
    dec: f64,
}

#[derive(Deserialize)]
struct UncheckedEquatorial {
    ra: f64,
    dec: f64,
}

impl TryFrom<UncheckedEquatorial> for EquatorialCoordinate {
    type Error = AstroError;

    fn try_from(raw: UncheckedEquatorial) -> AstroResult<Self> {
        Self::new(raw.ra, raw.dec)
    }
}

impl EquatorialCoordinate {
    /// Validate and build a coordinate. RA of exactly 24h is folded to 0h.
    pub fn new(ra_hours: f64, dec_degrees: f64) -> AstroResult<Self> {
        if !ra_hours.is_finite() || !(0.0..=24.0).contains(&ra_hours) {
            return Err(AstroError::InvalidCoordinate {
                name: "right ascension",
                value: ra_hours,
                min: 0.0,
                max: 24.0,
            });
        }
        if !dec_degrees.is_finite() || !(-90.0..=90.0).contains(&dec_degrees) {
            return Err(AstroError::InvalidCoordinate {
                name: "declination",
                value: dec_degrees,
                min: -90.0,
                max: 90.0,
            });
        }
        let ra = if ra_hours >= 24.0 { 0.0 } else { ra_hours };
        Ok(Self {
            ra,
            dec: dec_degrees,
        })
    }

    /// Build from values produced by the axis math, which are in range up to
    /// rounding.
    pub(crate) fn clamped(ra_hours: f64, dec_degrees: f64) -> Self {
        Self {
            ra: crate::ranges::range24(ra_hours),
            dec: dec_degrees.clamp(-90.0, 90.0),
        }
    }

    /// Right ascension in hours, `[0, 24)`
    pub fn ra(&self) -> f64 {
        self.ra
    }

    /// Declination in degrees, `[-90, 90]`
    pub fn dec(&self) -> f64 {
        self.dec
    }
}

impl fmt::Display for EquatorialCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RA {:.4}h Dec {:+.4}°", self.ra, self.dec)
    }
}

/// Altitude and azimuth in degrees (azimuth from north through east)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AltAzCoordinate {
    pub alt: f64,
    pub az: f64,
}

impl AltAzCoordinate {
    pub const fn new(alt: f64, az: f64) -> Self {
        Self { alt, az }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hemisphere {
    North,
    South,
}

impl Hemisphere {
    pub fn from_latitude(latitude: f64) -> Self {
        if latitude >= 0.0 {
            Hemisphere::North
        } else {
            Hemisphere::South
        }
    }
}

/// Side of the pier the optical tube sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PierSide {
    East,
    West,
}

impl PierSide {
    pub fn opposite(self) -> Self {
        match self {
            PierSide::East => PierSide::West,
            PierSide::West => PierSide::East,
        }
    }
}

impl fmt::Display for PierSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PierSide::East => write!(f, "East"),
            PierSide::West => write!(f, "West"),
        }
    }
}

/// Observing site. Longitude is east positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

impl Default for SiteLocation {
    fn default() -> Self {
        Self {
            latitude: 52.67,
            longitude: 0.0,
            elevation: 0.0,
        }
    }
}

impl SiteLocation {
    pub fn hemisphere(&self) -> Hemisphere {
        Hemisphere::from_latitude(self.latitude)
    }
}

/// The fixed frame every axis conversion is made in: the encoder zero and
/// the site hemisphere. Set once per session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisFrame {
    pub zero: AxisPosition,
    pub hemisphere: Hemisphere,
}

impl AxisFrame {
    pub const fn new(zero: AxisPosition, hemisphere: Hemisphere) -> Self {
        Self { zero, hemisphere }
    }
}
