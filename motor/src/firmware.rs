//! Firmware-dependent speed thresholds
//!
//! Motor boards switch between a low-speed (microstepped) and a high-speed
//! mode. Where the switch happens depends on the board version, so the rule
//! is kept here as a small table instead of inline conditionals.

use serde::{Deserialize, Serialize};

/// Last board version with the low switch threshold
pub const LEGACY_VERSION: u32 = 0x0301;

/// Low/high switch for boards up to [`LEGACY_VERSION`] (arcsec/s)
pub const LEGACY_HIGH_SPEED_THRESHOLD: f64 = 1000.0;

/// Low/high switch for newer boards (arcsec/s)
pub const HIGH_SPEED_THRESHOLD: f64 = 3000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedClass {
    Low,
    High,
}

impl SpeedClass {
    /// Speed class for a rate magnitude (arcsec/s) on the given firmware
    pub fn select(rate_arcsec: f64, profile: &SpeedProfile) -> Self {
        if profile.clamp(rate_arcsec).abs() > profile.high_speed_threshold {
            SpeedClass::High
        } else {
            SpeedClass::Low
        }
    }
}

/// Rates inside `(low, high]` are pulled down to `low`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampBand {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    pub version: u32,
    /// Rates above this (arcsec/s) run in high-speed mode
    pub high_speed_threshold: f64,
    /// Band of rates the board cannot run reliably in either mode
    pub clamp_band: Option<ClampBand>,
}

impl SpeedProfile {
    /// Profile for a motor board version in `0xMMmm` form
    pub fn for_firmware(version: u32) -> Self {
        let high_speed_threshold = if version <= LEGACY_VERSION {
            LEGACY_HIGH_SPEED_THRESHOLD
        } else {
            HIGH_SPEED_THRESHOLD
        };

        let clamp_band = (version == LEGACY_VERSION).then_some(ClampBand {
            low: LEGACY_HIGH_SPEED_THRESHOLD,
            high: 1.2 * LEGACY_HIGH_SPEED_THRESHOLD,
        });

        Self {
            version,
            high_speed_threshold,
            clamp_band,
        }
    }

    /// Apply the clamp band, keeping the sign of the rate
    pub fn clamp(&self, rate_arcsec: f64) -> f64 {
        match self.clamp_band {
            Some(band) if rate_arcsec.abs() > band.low && rate_arcsec.abs() <= band.high => {
                band.low.copysign(rate_arcsec)
            }
            _ => rate_arcsec,
        }
    }
}

impl Default for SpeedProfile {
    fn default() -> Self {
        Self::for_firmware(0x0302)
    }
}
