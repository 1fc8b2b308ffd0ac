//! Goto controller
//!
//! A goto is planned once and then supervised from the poll loop. Each
//! [`GotoController::tick`] takes the axis readings the poll just made and
//! decides the next step: keep waiting, start another leg, refine, or finish.
//!
//! Slews that would cross from a counterweights-up position to the other pier
//! side, or that start outside the RA limits, run in two legs: first to a safe
//! RA position, then a fresh direct plan from there.

use std::f64::consts::{FRAC_PI_2, PI};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use eqmod_astro::{
    axis_to_equatorial, equatorial_to_altaz, equatorial_to_axis, hour_angle, is_counterweight_up,
    pier_side_for_hour_angle, ra_offset, AlignmentModel, AxisFrame, AxisPosition, EquatorialCoordinate,
    Hemisphere, MappingOptions, PierSide, SiteLocation, ARCSEC_RAD, DEG_RAD, RAD_ARCSEC,
};
use eqmod_motor::{Axis, AxisStatus, MotorController, SpeedClass};

use crate::config::{GotoTuning, RaLimits};
use crate::error::{MotionAfterFailure, MountError, MountResult};
use crate::tracking::{TrackingController, TrackingMode};

/// Steps before the target at which a long goto starts braking
pub const SLOWDOWN_STEPS: f64 = 80_000.0;

// ============================================================================
// Planning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GotoTarget {
    Equatorial(EquatorialCoordinate),
    /// Raw axis position, used for park
    Axis(AxisPosition),
}

/// Which leg of a slew is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlewStage {
    Direct,
    /// Counterweights-up start on the wrong pier: swing RA down to the
    /// horizontal first, moving Dec to the target on the way
    RouteToLimitThenComplete,
    /// Start outside the RA limits: bring RA back to the limit first
    AtLimitAwaitingSecondLeg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GotoPlan {
    pub stage: SlewStage,
    /// Pier side the target is reached on
    pub pier: PierSide,
    /// Corrected final axis position
    pub target: AxisPosition,
    /// Where the current leg moves the axes
    pub leg: AxisPosition,
}

/// Everything planning reads besides the target and the current position
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub frame: AxisFrame,
    pub site: &'a SiteLocation,
    /// Local sidereal time, hours
    pub lst: f64,
    pub limits: RaLimits,
    pub counterweight_up: bool,
    pub model: &'a AlignmentModel,
    pub mapping: MappingOptions,
    /// Axis offset stored by a sync that did not add an alignment point
    pub sync_offset: AxisPosition,
}

impl PlanContext<'_> {
    /// Catalog axis position for a sky target on a pier, corrected into the
    /// position the mount has to reach
    pub fn corrected(&self, target: &EquatorialCoordinate, pier: PierSide) -> AxisPosition {
        let raw = equatorial_to_axis(&self.frame, target, self.lst, pier);
        let altaz = equatorial_to_altaz(self.site, target, self.lst);
        self.model.catalog_to_mount(&self.frame, raw, pier, altaz, &self.mapping) + self.sync_offset
    }

    /// Final axis position and pier side for a target
    pub fn target_axis(&self, target: &GotoTarget) -> (AxisPosition, PierSide) {
        match target {
            GotoTarget::Axis(position) => {
                let (_, pier) = axis_to_equatorial(&self.frame, position, self.lst);
                (*position, pier)
            }
            GotoTarget::Equatorial(coord) => {
                let ha = hour_angle(coord.ra(), self.lst);
                let pier = pier_side_for_hour_angle(ha, self.counterweight_up);
                let position = self.corrected(coord, pier);

                if self.counterweight_up && !self.limits.contains(ra_offset(self.frame.zero.ra, position.ra)) {
                    let pier = pier_side_for_hour_angle(ha, false);
                    debug!("Counterweights-up target outside RA limits, using {} pier", pier);
                    return (self.corrected(coord, pier), pier);
                }
                (position, pier)
            }
        }
    }
}

/// Plan a goto from `current`. Pure: the same inputs give the same plan.
pub fn plan(target: &GotoTarget, current: &AxisPosition, ctx: &PlanContext<'_>) -> GotoPlan {
    let (target_axis, pier) = ctx.target_axis(target);
    let zero = ctx.frame.zero.ra;
    let offset = ra_offset(zero, current.ra);
    let (_, current_pier) = axis_to_equatorial(&ctx.frame, current, ctx.lst);

    let stage = if !ctx.limits.contains(offset) {
        SlewStage::AtLimitAwaitingSecondLeg
    } else if is_counterweight_up(zero, current.ra) && current_pier != pier {
        SlewStage::RouteToLimitThenComplete
    } else {
        SlewStage::Direct
    };

    let leg = match stage {
        SlewStage::Direct => target_axis,
        SlewStage::RouteToLimitThenComplete => AxisPosition::new(zero + FRAC_PI_2.copysign(offset), target_axis.dec),
        SlewStage::AtLimitAwaitingSecondLeg => AxisPosition::new(zero + ctx.limits.clamp(offset), current.dec),
    };

    GotoPlan {
        stage,
        pier,
        target: target_axis,
        leg,
    }
}

/// Distance (rad) after the start at which a goto begins braking. Short
/// moves brake half way.
pub fn slowdown_distance(delta: f64, steps_per_rev: u32) -> f64 {
    let delta = delta.abs();
    let offset = SLOWDOWN_STEPS / steps_per_rev.max(1) as f64 * 2.0 * PI;
    let slowdown = delta - offset;
    if slowdown < 0.0 {
        delta * 0.5
    } else {
        slowdown
    }
}

/// RA goto lead (rad) covering sidereal drift while the axis moves
pub fn ra_compensation(arcsec: f64, forward: bool, hemisphere: Hemisphere) -> f64 {
    let lead = arcsec * ARCSEC_RAD;
    match (hemisphere, forward) {
        (Hemisphere::North, true) | (Hemisphere::South, false) => lead,
        _ => -lead,
    }
}

fn component(position: &AxisPosition, axis: Axis) -> f64 {
    match axis {
        Axis::Ra => position.ra,
        Axis::Dec => position.dec,
    }
}

// ============================================================================
// Supervision
// ============================================================================

/// Axis readings taken by one poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisReadings {
    pub position: AxisPosition,
    pub status: [AxisStatus; 2],
}

/// Result of one supervision step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GotoTick {
    /// No goto in progress
    Idle,
    /// Axes still moving or a new leg was started
    Busy,
    Completed { parked: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GotoPhase {
    Idle,
    Slewing(SlewStage),
    /// Target-seeking passes after the first, `pass` counting from 2
    Refining { pass: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlewMode {
    /// Constant rate (rad/s) until each axis passes its leg target
    FixedRate(f64),
    /// Target-seeking gotos with braking
    Iterative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisSlew {
    Idle,
    Seeking,
    Rate { forward: bool },
}

/// What a goto needs from the mount while it runs
pub struct GotoContext<'a> {
    pub motor: &'a mut dyn MotorController,
    pub tracking: &'a mut TrackingController,
    pub plan: PlanContext<'a>,
    pub tuning: &'a GotoTuning,
}

#[derive(Debug)]
struct GotoState {
    target: GotoTarget,
    plan: GotoPlan,
    mode: SlewMode,
    axes: [AxisSlew; 2],
    passes_left: u32,
    passes: u32,
    fixed_rate_retries: u32,
    started: Instant,
    resume: TrackingMode,
    park: bool,
    holding: bool,
}

enum Step {
    Continue,
    Done,
}

impl GotoState {
    fn operation(&self) -> &'static str {
        if self.park {
            "park"
        } else {
            "slew"
        }
    }

    async fn start_leg(&mut self, ctx: &mut GotoContext<'_>, current: &AxisPosition) -> MountResult<()> {
        let leg = self.plan.leg;
        debug!("{:?} leg from {} to {}", self.plan.stage, current, leg);

        for axis in Axis::BOTH {
            let from = component(current, axis);
            let to = component(&leg, axis);
            let delta = to - from;
            let half_step = PI / ctx.motor.steps_per_revolution(axis).max(1) as f64;
            if delta.abs() < half_step {
                self.axes[axis.index()] = AxisSlew::Idle;
                continue;
            }

            let forward = delta > 0.0;
            ctx.tracking.release(axis);
            match self.mode {
                SlewMode::FixedRate(rate) => {
                    let rate = rate.copysign(delta);
                    let class = SpeedClass::select(rate * RAD_ARCSEC, &ctx.motor.speed_profile());
                    ctx.motor.slew_at_rate(axis, rate, class).await?;
                    self.axes[axis.index()] = AxisSlew::Rate { forward };
                }
                SlewMode::Iterative => {
                    let mut target = to;
                    if axis == Axis::Ra && self.resume.is_on() && !self.park {
                        target += ra_compensation(
                            ctx.tuning.ra_compensation_arcsec,
                            forward,
                            ctx.plan.frame.hemisphere,
                        );
                    }
                    let slowdown = slowdown_distance(delta, ctx.motor.steps_per_revolution(axis));
                    ctx.motor.slew_to(axis, target, slowdown).await?;
                    self.axes[axis.index()] = AxisSlew::Seeking;
                }
            }
        }

        self.holding = false;
        if self.mode == SlewMode::Iterative {
            self.passes += 1;
        }
        Ok(())
    }

    async fn supervise(&mut self, ctx: &mut GotoContext<'_>, readings: &AxisReadings) -> MountResult<Step> {
        let timeout = ctx.tuning.slew_timeout();
        if self.started.elapsed() > timeout {
            return Err(MountError::Timeout {
                operation: self.operation().to_string(),
                duration: timeout,
            });
        }

        for axis in Axis::BOTH {
            let i = axis.index();
            match self.axes[i] {
                AxisSlew::Idle => {}
                AxisSlew::Seeking => {
                    if !readings.status[i].is_busy() {
                        self.axes[i] = AxisSlew::Idle;
                    }
                }
                AxisSlew::Rate { forward } => {
                    let position = component(&readings.position, axis);
                    let to = component(&self.plan.leg, axis);
                    let passed = if forward { position >= to } else { position <= to };
                    if passed || !readings.status[i].is_busy() {
                        ctx.motor.stop(axis).await?;
                        self.axes[i] = AxisSlew::Idle;
                    }
                }
            }
        }

        let ra_active = self.axes[Axis::Ra.index()] != AxisSlew::Idle;
        let dec_active = self.axes[Axis::Dec.index()] != AxisSlew::Idle;
        match (ra_active, dec_active) {
            (true, true) | (true, false) => Ok(Step::Continue),
            (false, true) => {
                if !self.holding && matches!(self.target, GotoTarget::Equatorial(_)) {
                    debug!("RA axis done, holding at sidereal while Dec finishes");
                    let rate = ctx.tracking.sidereal_axis_rate();
                    ctx.tracking.start_by_rate(ctx.motor, Axis::Ra, rate).await?;
                    self.holding = true;
                }
                Ok(Step::Continue)
            }
            (false, false) => self.finish_leg(ctx, &readings.position).await,
        }
    }

    async fn finish_leg(&mut self, ctx: &mut GotoContext<'_>, position: &AxisPosition) -> MountResult<Step> {
        if self.plan.stage != SlewStage::Direct {
            info!("{:?} leg done, finishing with a direct slew", self.plan.stage);
            let mut next = plan(&self.target, position, &ctx.plan);
            next.stage = SlewStage::Direct;
            next.leg = next.target;
            self.plan = next;
            self.start_leg(ctx, position).await?;
            return Ok(Step::Continue);
        }

        // The sky moved during the slew. The residual is measured against the
        // target without the RA lead, so a lead larger than the resolution
        // keeps refining on a mount that does not drift.
        let (target, _) = ctx.plan.target_axis(&self.target);
        self.plan.target = target;
        self.plan.leg = target;
        let residual_ra = (target.ra - position.ra).abs();
        let residual_dec = (target.dec - position.dec).abs();

        match self.mode {
            SlewMode::FixedRate(_) => {
                let within = residual_ra < ctx.tuning.ra_tolerance_deg * DEG_RAD
                    && residual_dec < ctx.tuning.dec_tolerance_deg * DEG_RAD;
                if within {
                    debug!("Fixed-rate slew within tolerance, refining");
                    self.mode = SlewMode::Iterative;
                } else {
                    self.fixed_rate_retries += 1;
                    if self.fixed_rate_retries >= ctx.tuning.max_fixed_rate_retries {
                        warn!(
                            "Fixed-rate slew missed the target {} times, switching to goto",
                            self.fixed_rate_retries
                        );
                        self.mode = SlewMode::Iterative;
                    }
                }
                self.start_leg(ctx, position).await?;
                Ok(Step::Continue)
            }
            SlewMode::Iterative => {
                self.passes_left = self.passes_left.saturating_sub(1);
                let residual = residual_ra.max(residual_dec) * RAD_ARCSEC;
                let verifiable = self.resume.is_on() && !self.park;

                if !verifiable || residual < ctx.tuning.resolution_arcsec {
                    Ok(Step::Done)
                } else if self.passes_left == 0 {
                    warn!("Goto residual {:.1}\" after {} passes, accepting", residual, self.passes);
                    Ok(Step::Done)
                } else {
                    debug!("Goto residual {:.1}\", refining ({} passes left)", residual, self.passes_left);
                    self.start_leg(ctx, position).await?;
                    Ok(Step::Continue)
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct GotoController {
    state: Option<GotoState>,
}

impl GotoController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_parking(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.park)
    }

    pub fn target(&self) -> Option<GotoTarget> {
        self.state.as_ref().map(|s| s.target)
    }

    pub fn plan(&self) -> Option<GotoPlan> {
        self.state.as_ref().map(|s| s.plan)
    }

    pub fn phase(&self) -> GotoPhase {
        match &self.state {
            None => GotoPhase::Idle,
            Some(s) if s.mode == SlewMode::Iterative && s.passes > 1 => GotoPhase::Refining { pass: s.passes },
            Some(s) => GotoPhase::Slewing(s.plan.stage),
        }
    }

    /// Tracking mode restored when the goto completes
    pub fn set_resume(&mut self, mode: TrackingMode) {
        if let Some(state) = self.state.as_mut() {
            state.resume = mode;
        }
    }

    /// Plan a goto and start its first leg. Replaces any goto in progress.
    pub async fn start(
        &mut self,
        ctx: &mut GotoContext<'_>,
        target: GotoTarget,
        current: AxisPosition,
        park: bool,
    ) -> MountResult<GotoPlan> {
        let resume = match self.state.take() {
            Some(previous) => previous.resume,
            None => ctx.tracking.mode(),
        };

        let plan = plan(&target, &current, &ctx.plan);
        let mode = if ctx.tuning.slew_rate_deg_per_sec != 0.0 {
            SlewMode::FixedRate(ctx.tuning.slew_rate_deg_per_sec.abs() * DEG_RAD)
        } else {
            SlewMode::Iterative
        };
        let mut state = GotoState {
            target,
            plan,
            mode,
            axes: [AxisSlew::Idle; 2],
            passes_left: ctx.tuning.max_slew_count.max(1),
            passes: 0,
            fixed_rate_retries: 0,
            started: Instant::now(),
            resume,
            park,
            holding: false,
        };
        info!(
            "Starting {} to {:?}: {:?} stage, {} pier, target {}",
            state.operation(),
            target,
            plan.stage,
            plan.pier,
            plan.target
        );

        let mut started = Ok(());
        if park {
            started = ctx
                .tracking
                .set_mode(ctx.motor, TrackingMode::Off)
                .await
                .map_err(MountError::from);
        }
        if started.is_ok() {
            started = state.start_leg(ctx, &current).await;
        }
        if let Err(e) = started {
            return Err(stop_after_failure(ctx, state.operation(), e).await);
        }

        self.state = Some(state);
        Ok(plan)
    }

    /// Advance the goto with fresh readings
    pub async fn tick(&mut self, ctx: &mut GotoContext<'_>, readings: &AxisReadings) -> MountResult<GotoTick> {
        let Some(mut state) = self.state.take() else {
            return Ok(GotoTick::Idle);
        };

        match state.supervise(ctx, readings).await {
            Ok(Step::Continue) => {
                self.state = Some(state);
                Ok(GotoTick::Busy)
            }
            Ok(Step::Done) => {
                let resume = if state.park { TrackingMode::Off } else { state.resume };
                if let Err(e) = ctx.tracking.set_mode(ctx.motor, resume).await {
                    return Err(stop_after_failure(ctx, state.operation(), e.into()).await);
                }
                info!("{} complete at {}", state.operation(), readings.position);
                Ok(GotoTick::Completed { parked: state.park })
            }
            Err(e) => Err(stop_after_failure(ctx, state.operation(), e).await),
        }
    }

    /// Drop the goto after a failure outside the controller, stopping the
    /// motors. Returns the error to report.
    pub async fn fail(&mut self, ctx: &mut GotoContext<'_>, error: MountError) -> MountError {
        let operation = self.state.take().map_or("slew", |s| s.operation());
        stop_after_failure(ctx, operation, error).await
    }

    /// Stop both axes and drop the goto. Tracking goes back to the mode
    /// selected before the slew.
    pub async fn abort(&mut self, ctx: &mut GotoContext<'_>) -> MountResult<()> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        info!("{} aborted", state.operation());
        if let Err(e) = ctx.motor.stop_all().await {
            return Err(stop_after_failure(ctx, state.operation(), e.into()).await);
        }
        for axis in Axis::BOTH {
            ctx.tracking.release(axis);
        }
        if let Err(e) = ctx.tracking.set_mode(ctx.motor, state.resume).await {
            return Err(stop_after_failure(ctx, state.operation(), e.into()).await);
        }
        Ok(())
    }
}

async fn stop_after_failure(ctx: &mut GotoContext<'_>, operation: &str, error: MountError) -> MountError {
    let left = match ctx.motor.stop_all().await {
        Ok(()) => MotionAfterFailure::Stopped,
        Err(stop_error) => {
            warn!("Stop after failed {} also failed: {}", operation, stop_error);
            MotionAfterFailure::Unknown
        }
    };
    for axis in Axis::BOTH {
        ctx.tracking.release(axis);
    }
    warn!("{} aborted ({}): {}", operation, left, error);
    MountError::aborted(operation, left, error)
}
