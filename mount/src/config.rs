//! Mount configuration
//!
//! Every section has defaults, so a partial JSON document (or `{}`) is a
//! valid configuration. Loading and saving the document is up to the host.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::time::Duration;

use eqmod_astro::alignment::DEFAULT_MAX_POINTS;
use eqmod_astro::{
    AxisFrame, AxisPosition, MapperKind, MappingOptions, PointFilter, SiteLocation, DEG_RAD,
    SIDEREAL_RATE_ARCSEC,
};
use eqmod_motor::TransportConfig;

use crate::error::{MountError, MountResult};
use crate::tracking::TrackingMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub site: SiteLocation,
    /// Axis readings (rad) with the counterweights down and the Dec axis at 0
    pub zero_position: AxisPosition,
    pub park_position: AxisPosition,
    /// Write the home position to the encoders on connect
    pub sync_home_on_connect: bool,
    pub ra_limits: RaLimits,
    pub goto: GotoTuning,
    pub alignment: AlignmentSettings,
    pub tracking: TrackingSettings,
    pub poll_interval_ms: u64,
    pub connection: ConnectionConfig,
}

impl Default for MountConfig {
    fn default() -> Self {
        let zero = AxisPosition::new(0.0, 0.0);
        Self {
            site: SiteLocation::default(),
            zero_position: zero,
            park_position: home_position(&zero),
            sync_home_on_connect: true,
            ra_limits: RaLimits::default(),
            goto: GotoTuning::default(),
            alignment: AlignmentSettings::default(),
            tracking: TrackingSettings::default(),
            poll_interval_ms: 1000,
            connection: ConnectionConfig::default(),
        }
    }
}

impl MountConfig {
    pub fn from_json(json: &str) -> MountResult<Self> {
        serde_json::from_str(json).map_err(|e| MountError::InvalidData(format!("mount config: {}", e)))
    }

    pub fn to_json(&self) -> MountResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MountError::InvalidData(format!("mount config: {}", e)))
    }

    pub fn frame(&self) -> AxisFrame {
        AxisFrame::new(self.zero_position, self.site.hemisphere())
    }

    /// Counterweights down, tube at the pole
    pub fn home_position(&self) -> AxisPosition {
        home_position(&self.zero_position)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn home_position(zero: &AxisPosition) -> AxisPosition {
    AxisPosition::new(zero.ra, zero.dec + FRAC_PI_2)
}

/// Mechanical RA travel, as signed offsets (rad) from the RA zero position.
/// `east` is the most negative offset allowed and `west` the most positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaLimits {
    pub enabled: bool,
    pub east: f64,
    pub west: f64,
}

impl Default for RaLimits {
    fn default() -> Self {
        let margin = 15.0 * DEG_RAD;
        Self {
            enabled: false,
            east: -(FRAC_PI_2 + margin),
            west: FRAC_PI_2 + margin,
        }
    }
}

impl RaLimits {
    pub fn contains(&self, offset: f64) -> bool {
        !self.enabled || (self.east..=self.west).contains(&offset)
    }

    pub fn clamp(&self, offset: f64) -> f64 {
        offset.clamp(self.east, self.west)
    }
}

/// Goto iteration and tolerance constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GotoTuning {
    /// Target-seeking passes before a goto is accepted regardless of residual
    pub max_slew_count: u32,
    pub max_fixed_rate_retries: u32,
    /// Residual below which a refinement pass is final
    pub resolution_arcsec: f64,
    pub ra_tolerance_deg: f64,
    pub dec_tolerance_deg: f64,
    /// Added to RA goto targets while tracking to cover drift during the move
    pub ra_compensation_arcsec: f64,
    pub counterweight_up: bool,
    /// Nonzero runs the first legs at this constant rate instead of a goto
    pub slew_rate_deg_per_sec: f64,
    /// A slew still running after this long is stopped and reported
    pub slew_timeout_secs: u64,
}

impl Default for GotoTuning {
    fn default() -> Self {
        Self {
            max_slew_count: 5,
            max_fixed_rate_retries: 5,
            resolution_arcsec: 10.0,
            ra_tolerance_deg: 1.0,
            dec_tolerance_deg: 0.667,
            ra_compensation_arcsec: 0.0,
            counterweight_up: false,
            slew_rate_deg_per_sec: 0.0,
            slew_timeout_secs: 300,
        }
    }
}

impl GotoTuning {
    pub fn slew_timeout(&self) -> Duration {
        Duration::from_secs(self.slew_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentSettings {
    pub mapper: MapperKind,
    pub filter: PointFilter,
    pub local_to_pier: bool,
    pub triangle_search: bool,
    /// Store a point on every sync; otherwise a sync only moves the global
    /// sync offset
    pub append_on_sync: bool,
    pub max_points: usize,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            mapper: MapperKind::Taki,
            filter: PointFilter::AllPoints,
            local_to_pier: false,
            triangle_search: true,
            append_on_sync: true,
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

impl AlignmentSettings {
    pub fn mapping(&self) -> MappingOptions {
        MappingOptions {
            mapper: self.mapper,
            filter: self.filter,
            local_to_pier: self.local_to_pier,
            triangle_search: self.triangle_search,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Mode applied once the mount connects
    pub default_mode: TrackingMode,
    pub custom_ra_rate: f64,
    pub custom_dec_rate: f64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            default_mode: TrackingMode::Off,
            custom_ra_rate: SIDEREAL_RATE_ARCSEC,
            custom_dec_rate: 0.0,
        }
    }
}

impl TrackingSettings {
    pub fn custom_mode(&self) -> TrackingMode {
        TrackingMode::Custom {
            ra: self.custom_ra_rate,
            dec: self.custom_dec_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            timeout_ms: 1000,
            retries: 1,
        }
    }
}

impl ConnectionConfig {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
        }
    }
}
