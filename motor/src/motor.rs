//! Axis command interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MotorResult;
use crate::firmware::{SpeedClass, SpeedProfile};

/// Mount axis. The controller addresses RA as `1` and Dec as `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Ra,
    Dec,
}

impl Axis {
    pub const BOTH: [Axis; 2] = [Axis::Ra, Axis::Dec];

    pub fn as_char(self) -> char {
        match self {
            Axis::Ra => '1',
            Axis::Dec => '2',
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::Ra => 0,
            Axis::Dec => 1,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Ra => write!(f, "RA"),
            Axis::Dec => write!(f, "Dec"),
        }
    }
}

/// What an axis is doing. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisMotion {
    Stopped,
    /// Running at a constant rate
    Slewing,
    /// Seeking a target position
    SlewingTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisStatus {
    pub motion: AxisMotion,
    pub high_speed: bool,
    pub forward: bool,
    pub initialized: bool,
}

impl AxisStatus {
    pub fn stopped() -> Self {
        Self {
            motion: AxisMotion::Stopped,
            high_speed: false,
            forward: true,
            initialized: true,
        }
    }

    /// Busy is a normal polling state, not an error
    pub fn is_busy(&self) -> bool {
        self.motion != AxisMotion::Stopped
    }
}

/// Per-axis motor capability set implemented by each mount family.
///
/// Angles are absolute axis positions in radians and rates are signed
/// radians per second; implementations convert to steps and timer periods
/// with scale factors fixed at [`initialize`](Self::initialize).
#[async_trait]
pub trait MotorController: Send + Sync {
    /// Read the axis constants and bring both axes up
    async fn initialize(&mut self) -> MotorResult<()>;

    /// Stop the axis, set its speed class and direction, then run at `rate`
    async fn slew_at_rate(&mut self, axis: Axis, rate: f64, class: SpeedClass) -> MotorResult<()>;

    /// Update the rate of an axis already running in the same class and
    /// direction, without stopping it
    async fn change_rate(&mut self, axis: Axis, rate: f64, class: SpeedClass) -> MotorResult<()>;

    /// Seek an absolute position, braking `slowdown` radians after the start
    async fn slew_to(&mut self, axis: Axis, target: f64, slowdown: f64) -> MotorResult<()>;

    /// Stop one axis
    async fn stop(&mut self, axis: Axis) -> MotorResult<()>;

    /// Stop both axes. Both stops are attempted even if the first fails.
    async fn stop_all(&mut self) -> MotorResult<()> {
        let ra = self.stop(Axis::Ra).await;
        let dec = self.stop(Axis::Dec).await;
        ra.and(dec)
    }

    /// Redefine the current position of an axis
    async fn set_position(&mut self, axis: Axis, position: f64) -> MotorResult<()>;

    async fn get_position(&self, axis: Axis) -> MotorResult<f64>;

    async fn get_status(&self, axis: Axis) -> MotorResult<AxisStatus>;

    /// Encoder steps per full axis revolution
    fn steps_per_revolution(&self, axis: Axis) -> u32;

    /// High/low speed thresholds for the connected firmware
    fn speed_profile(&self) -> SpeedProfile;
}
