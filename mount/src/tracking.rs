//! Tracking controller
//!
//! Owns the selected tracking mode and the rate last applied to each axis.
//! A start always goes through `slew_at_rate` (stop, set class and
//! direction, run). A change keeps the axis running when the speed class and
//! direction are unchanged and restarts it otherwise.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use eqmod_astro::{Hemisphere, ARCSEC_RAD, LUNAR_RATE_ARCSEC, SIDEREAL_RATE_ARCSEC, SOLAR_RATE_ARCSEC};
use eqmod_motor::{Axis, MotorController, MotorResult, SpeedClass};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum TrackingMode {
    #[default]
    Off,
    Sidereal,
    Lunar,
    Solar,
    /// Explicit RA and Dec rates in arcsec/s
    Custom { ra: f64, dec: f64 },
}

impl TrackingMode {
    pub fn is_on(&self) -> bool {
        !matches!(self, TrackingMode::Off)
    }

    /// (RA, Dec) sky rates in arcsec/s, before hemisphere signs
    pub fn rates(&self) -> (f64, f64) {
        match self {
            TrackingMode::Off => (0.0, 0.0),
            TrackingMode::Sidereal => (SIDEREAL_RATE_ARCSEC, 0.0),
            TrackingMode::Lunar => (LUNAR_RATE_ARCSEC, 0.0),
            TrackingMode::Solar => (SOLAR_RATE_ARCSEC, 0.0),
            TrackingMode::Custom { ra, dec } => (*ra, *dec),
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMode::Off => write!(f, "off"),
            TrackingMode::Sidereal => write!(f, "sidereal"),
            TrackingMode::Lunar => write!(f, "lunar"),
            TrackingMode::Solar => write!(f, "solar"),
            TrackingMode::Custom { ra, dec } => write!(f, "custom (ra={}\"/s, dec={}\"/s)", ra, dec),
        }
    }
}

/// Periodic error correction hook. Returns an RA rate adjustment in arcsec/s
/// for the current RA axis position.
pub trait PecCorrector: Send + Sync {
    fn reset(&mut self);

    fn correction(&mut self, ra_position: f64) -> f64;
}

/// PEC disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPec;

impl PecCorrector for NoPec {
    fn reset(&mut self) {}

    fn correction(&mut self, _ra_position: f64) -> f64 {
        0.0
    }
}

/// What an axis was last told to do by the tracking controller
#[derive(Debug, Clone, Copy, PartialEq)]
enum AppliedRate {
    Stopped,
    Running { rate: f64, class: SpeedClass },
}

pub struct TrackingController {
    mode: TrackingMode,
    hemisphere: Hemisphere,
    applied: [AppliedRate; 2],
    pec: Box<dyn PecCorrector>,
}

impl TrackingController {
    pub fn new(hemisphere: Hemisphere) -> Self {
        Self {
            mode: TrackingMode::Off,
            hemisphere,
            applied: [AppliedRate::Stopped; 2],
            pec: Box::new(NoPec),
        }
    }

    pub fn with_pec(mut self, pec: Box<dyn PecCorrector>) -> Self {
        self.pec = pec;
        self
    }

    pub fn set_pec(&mut self, pec: Box<dyn PecCorrector>) {
        self.pec = pec;
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// Signed rate (arcsec/s) currently applied to an axis, 0 when stopped
    pub fn applied_rate(&self, axis: Axis) -> f64 {
        match self.applied[axis.index()] {
            AppliedRate::Stopped => 0.0,
            AppliedRate::Running { rate, .. } => rate,
        }
    }

    /// Axis rates (arcsec/s) for a mode at this site. RA runs backwards in
    /// the southern hemisphere, and so does a custom Dec rate.
    pub fn axis_rates(&self, mode: TrackingMode) -> (f64, f64) {
        let (ra, dec) = mode.rates();
        match self.hemisphere {
            Hemisphere::North => (ra, dec),
            Hemisphere::South => (-ra, -dec),
        }
    }

    /// Signed sidereal rate for the RA axis at this site
    pub fn sidereal_axis_rate(&self) -> f64 {
        self.axis_rates(TrackingMode::Sidereal).0
    }

    /// Start an axis at `rate` arcsec/s, stopping it first. Zero stops it.
    pub async fn start_by_rate(
        &mut self,
        motor: &mut dyn MotorController,
        axis: Axis,
        rate: f64,
    ) -> MotorResult<()> {
        let profile = motor.speed_profile();
        let rate = profile.clamp(rate);
        if rate == 0.0 {
            motor.stop(axis).await?;
            self.applied[axis.index()] = AppliedRate::Stopped;
            return Ok(());
        }

        let class = SpeedClass::select(rate, &profile);
        self.pec.reset();
        debug!("{} axis start at {:.4}\"/s ({:?})", axis, rate, class);
        motor.slew_at_rate(axis, rate * ARCSEC_RAD, class).await?;
        self.applied[axis.index()] = AppliedRate::Running { rate, class };
        Ok(())
    }

    /// Move an axis to a new rate, restarting it only when the speed class
    /// or direction changes
    pub async fn change_by_rate(
        &mut self,
        motor: &mut dyn MotorController,
        axis: Axis,
        rate: f64,
    ) -> MotorResult<()> {
        let profile = motor.speed_profile();
        let rate = profile.clamp(rate);
        if rate == 0.0 {
            return self.start_by_rate(motor, axis, 0.0).await;
        }

        let class = SpeedClass::select(rate, &profile);
        match self.applied[axis.index()] {
            AppliedRate::Running {
                rate: current,
                class: current_class,
            } if current_class == class && current.signum() == rate.signum() => {
                if current != rate {
                    motor.change_rate(axis, rate * ARCSEC_RAD, class).await?;
                    self.applied[axis.index()] = AppliedRate::Running { rate, class };
                }
                Ok(())
            }
            _ => self.start_by_rate(motor, axis, rate).await,
        }
    }

    /// Select a mode and apply its rates to both axes
    pub async fn set_mode(&mut self, motor: &mut dyn MotorController, mode: TrackingMode) -> MotorResult<()> {
        self.mode = mode;
        self.apply(motor).await
    }

    /// Re-apply the selected mode's rates
    pub async fn apply(&mut self, motor: &mut dyn MotorController) -> MotorResult<()> {
        self.resume_axis(motor, Axis::Ra).await?;
        let dec = self.axis_rates(self.mode).1;
        if dec != 0.0 || self.applied_rate(Axis::Dec) != 0.0 {
            self.resume_axis(motor, Axis::Dec).await?;
        }
        Ok(())
    }

    /// Put one axis back on the selected mode's rate, stopping it when the
    /// mode has none for it
    pub async fn resume_axis(&mut self, motor: &mut dyn MotorController, axis: Axis) -> MotorResult<()> {
        let (ra, dec) = self.axis_rates(self.mode);
        let rate = match axis {
            Axis::Ra => ra,
            Axis::Dec => dec,
        };
        self.change_by_rate(motor, axis, rate).await
    }

    /// Record the mode without touching the motors. Used while a slew owns
    /// the axes.
    pub fn select(&mut self, mode: TrackingMode) {
        self.mode = mode;
    }

    /// Forget the applied rate of an axis another command took over
    pub fn release(&mut self, axis: Axis) {
        self.applied[axis.index()] = AppliedRate::Stopped;
    }

    /// Fold the PEC correction into the RA rate while tracking
    pub async fn correct_pec(&mut self, motor: &mut dyn MotorController, ra_position: f64) -> MotorResult<()> {
        if !self.mode.is_on() || self.applied_rate(Axis::Ra) == 0.0 {
            return Ok(());
        }
        let base = self.axis_rates(self.mode).0;
        let wanted = base + self.pec.correction(ra_position);
        if (wanted - self.applied_rate(Axis::Ra)).abs() > 1e-6 {
            self.change_by_rate(motor, Axis::Ra, wanted).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for TrackingController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingController")
            .field("mode", &self.mode)
            .field("hemisphere", &self.hemisphere)
            .field("applied", &self.applied)
            .finish()
    }
}
