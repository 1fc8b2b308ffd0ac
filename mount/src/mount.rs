//! Host-facing mount handle
//!
//! All mount state sits behind one async mutex. [`EqMount::poll`] is the
//! only call that reads the axes; getters and planning work from the
//! readings of the last poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use eqmod_astro::{
    axis_to_equatorial, equatorial_to_altaz, equatorial_to_axis, local_apparent_sidereal_time,
    AlignmentModel, AlignmentPoint, AltAzCoordinate, AxisFrame, AxisPosition, EquatorialCoordinate,
    PierSide,
};
use eqmod_motor::{Axis, MotorController, SkyWatcherController, Transport};

use crate::clock::{CancelToken, Clock, SystemClock};
use crate::config::{ConnectionConfig, MountConfig};
use crate::error::{MotionAfterFailure, MountError, MountResult};
use crate::goto::{AxisReadings, GotoContext, GotoController, GotoPhase, GotoPlan, GotoTarget, GotoTick, PlanContext};
use crate::tracking::{PecCorrector, TrackingController, TrackingMode};

/// Fastest manual axis rate, degrees per second
pub const MAX_MOVE_RATE_DEG: f64 = 4.0;

/// Outcome of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll was still running, or an abort was in progress
    Skipped,
    Disconnected,
    Tick(GotoTick),
}

/// Snapshot of the mount as of the last poll
#[derive(Debug, Clone, PartialEq)]
pub struct MountStatus {
    pub connected: bool,
    pub position: Option<EquatorialCoordinate>,
    pub axis_position: Option<AxisPosition>,
    pub pier: Option<PierSide>,
    pub altaz: Option<AltAzCoordinate>,
    pub slewing: bool,
    pub phase: GotoPhase,
    pub parked: bool,
    pub tracking: TrackingMode,
    /// Local apparent sidereal time, hours
    pub sidereal_time: f64,
}

// ============================================================================
// Core state
// ============================================================================

struct MountCore {
    config: MountConfig,
    frame: AxisFrame,
    clock: Arc<dyn Clock>,
    motor: Option<Box<dyn MotorController>>,
    tracking: TrackingController,
    goto: GotoController,
    model: AlignmentModel,
    sync_offset: AxisPosition,
    readings: Option<AxisReadings>,
    parked: bool,
    /// Axes running under `move_axis`
    manual: [bool; 2],
}

fn not_connected() -> MountError {
    MountError::NotConnected("mount is not connected".to_string())
}

impl MountCore {
    fn lst(&self) -> f64 {
        local_apparent_sidereal_time(self.config.site.longitude, &self.clock.now())
    }

    fn ensure_connected(&self) -> MountResult<()> {
        if self.motor.is_some() {
            Ok(())
        } else {
            Err(not_connected())
        }
    }

    fn ensure_unparked(&self) -> MountResult<()> {
        if self.parked {
            Err(MountError::InvalidOperation("mount is parked".to_string()))
        } else {
            Ok(())
        }
    }

    fn current(&self) -> MountResult<AxisPosition> {
        self.readings.map(|r| r.position).ok_or_else(not_connected)
    }

    fn motor(&mut self) -> MountResult<&mut dyn MotorController> {
        match self.motor.as_deref_mut() {
            Some(motor) => Ok(motor),
            None => Err(not_connected()),
        }
    }

    fn motor_and_tracking(&mut self) -> MountResult<(&mut dyn MotorController, &mut TrackingController)> {
        match self.motor.as_deref_mut() {
            Some(motor) => Ok((motor, &mut self.tracking)),
            None => Err(not_connected()),
        }
    }

    /// The goto controller and the context it runs in
    fn split(&mut self, lst: f64) -> MountResult<(&mut GotoController, GotoContext<'_>)> {
        let MountCore {
            config,
            frame,
            motor,
            tracking,
            goto,
            model,
            sync_offset,
            ..
        } = self;
        let motor = match motor.as_deref_mut() {
            Some(motor) => motor,
            None => return Err(not_connected()),
        };
        let ctx = GotoContext {
            motor,
            tracking,
            plan: PlanContext {
                frame: *frame,
                site: &config.site,
                lst,
                limits: config.ra_limits,
                counterweight_up: config.goto.counterweight_up,
                model,
                mapping: config.alignment.mapping(),
                sync_offset: *sync_offset,
            },
            tuning: &config.goto,
        };
        Ok((goto, ctx))
    }

    async fn read_axes(&mut self) -> MountResult<AxisReadings> {
        let motor = self.motor()?;
        let ra_status = motor.get_status(Axis::Ra).await?;
        let dec_status = motor.get_status(Axis::Dec).await?;
        let position = AxisPosition::new(motor.get_position(Axis::Ra).await?, motor.get_position(Axis::Dec).await?);
        let readings = AxisReadings {
            position,
            status: [ra_status, dec_status],
        };
        self.readings = Some(readings);
        Ok(readings)
    }

    /// Sky position of an axis position, with the pointing correction removed
    fn sky_position(&self, position: &AxisPosition, lst: f64) -> (EquatorialCoordinate, PierSide) {
        let (raw, pier) = axis_to_equatorial(&self.frame, position, lst);
        let mount_axis = *position - self.sync_offset;
        let altaz = equatorial_to_altaz(&self.config.site, &raw, lst);
        let catalog = self.model.mount_to_catalog(
            &self.frame,
            mount_axis,
            pier,
            altaz,
            &self.config.alignment.mapping(),
        );
        axis_to_equatorial(&self.frame, &catalog, lst)
    }

    /// Stop everything after a failed command and wrap the error
    async fn stop_after(&mut self, operation: &str, error: MountError) -> MountError {
        self.manual = [false; 2];
        let left = match self.motor() {
            Ok(motor) => match motor.stop_all().await {
                Ok(()) => MotionAfterFailure::Stopped,
                Err(stop_error) => {
                    warn!("Stop after failed {} also failed: {}", operation, stop_error);
                    MotionAfterFailure::Unknown
                }
            },
            Err(_) => MotionAfterFailure::Unknown,
        };
        for axis in Axis::BOTH {
            self.tracking.release(axis);
        }
        warn!("{} aborted ({}): {}", operation, left, error);
        MountError::aborted(operation, left, error)
    }

    async fn abort(&mut self) -> MountResult<()> {
        self.ensure_connected()?;
        let lst = self.lst();
        let (goto, mut ctx) = self.split(lst)?;
        goto.abort(&mut ctx).await?;

        let manual = std::mem::take(&mut self.manual);
        let (motor, tracking) = self.motor_and_tracking()?;
        for axis in Axis::BOTH {
            if manual[axis.index()] {
                tracking.resume_axis(motor, axis).await?;
            }
        }
        Ok(())
    }

    async fn start_goto(&mut self, target: GotoTarget, park: bool) -> MountResult<GotoPlan> {
        self.ensure_connected()?;
        let current = self.current()?;
        self.manual = [false; 2];
        let lst = self.lst();
        let (goto, mut ctx) = self.split(lst)?;
        goto.start(&mut ctx, target, current, park).await
    }
}

// ============================================================================
// Mount handle
// ============================================================================

/// Cheap to clone; clones drive the same mount
#[derive(Clone)]
pub struct EqMount {
    core: Arc<Mutex<MountCore>>,
    cancel: CancelToken,
    processing: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl EqMount {
    pub fn new(config: MountConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: MountConfig, clock: Arc<dyn Clock>) -> Self {
        let frame = config.frame();
        let poll_interval = config.poll_interval();
        let model = AlignmentModel::new(config.alignment.max_points);
        Self {
            core: Arc::new(Mutex::new(MountCore {
                tracking: TrackingController::new(frame.hemisphere),
                config,
                frame,
                clock,
                motor: None,
                goto: GotoController::new(),
                model,
                sync_offset: AxisPosition::default(),
                readings: None,
                parked: false,
                manual: [false; 2],
            })),
            cancel: CancelToken::new(),
            processing: Arc::new(AtomicBool::new(false)),
            poll_interval,
        }
    }

    pub async fn config(&self) -> MountConfig {
        self.core.lock().await.config.clone()
    }

    pub async fn set_pec_corrector(&self, pec: Box<dyn PecCorrector>) {
        self.core.lock().await.tracking.set_pec(pec);
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Open the configured serial port and bring up the motor controller
    pub async fn connect(&self) -> MountResult<()> {
        let connection = self.core.lock().await.config.connection.clone();
        info!("Opening mount port {} at {} baud", connection.port, connection.baud_rate);
        let transport = Transport::open(&connection.port, connection.baud_rate, connection.transport_config())?;
        self.connect_with(Box::new(SkyWatcherController::new(transport))).await
    }

    /// Replace the connection settings and connect
    pub async fn connect_to(&self, connection: ConnectionConfig) -> MountResult<()> {
        self.core.lock().await.config.connection = connection;
        self.connect().await
    }

    /// Connect through an already built controller
    pub async fn connect_with(&self, mut motor: Box<dyn MotorController>) -> MountResult<()> {
        let mut core = self.core.lock().await;
        if core.motor.is_some() {
            return Err(MountError::InvalidOperation("mount is already connected".to_string()));
        }

        motor.initialize().await?;
        if core.config.sync_home_on_connect {
            let home = core.config.home_position();
            motor.set_position(Axis::Ra, home.ra).await?;
            motor.set_position(Axis::Dec, home.dec).await?;
        }
        core.motor = Some(motor);
        core.parked = false;
        core.manual = [false; 2];
        core.goto = GotoController::new();

        let readings = match core.read_axes().await {
            Ok(readings) => readings,
            Err(e) => {
                core.motor = None;
                core.readings = None;
                return Err(e);
            }
        };
        info!("Mount connected at {}", readings.position);

        let mode = core.config.tracking.default_mode;
        if mode.is_on() {
            let (motor, tracking) = core.motor_and_tracking()?;
            tracking.set_mode(motor, mode).await?;
        }
        Ok(())
    }

    /// Stop the axes and drop the controller
    pub async fn disconnect(&self) -> MountResult<()> {
        let mut core = self.core.lock().await;
        let Some(mut motor) = core.motor.take() else {
            return Ok(());
        };
        core.goto = GotoController::new();
        core.readings = None;
        core.manual = [false; 2];
        for axis in Axis::BOTH {
            core.tracking.release(axis);
        }
        if let Err(e) = motor.stop_all().await {
            warn!("Stop on disconnect failed: {}", e);
        }
        info!("Mount disconnected");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.core.lock().await.motor.is_some()
    }

    // ------------------------------------------------------------------------
    // Motion
    // ------------------------------------------------------------------------

    /// Start a goto to RA (hours) and Dec (degrees). Supervised by
    /// [`poll`](Self::poll).
    pub async fn slew_to(&self, ra: f64, dec: f64) -> MountResult<GotoPlan> {
        let target = EquatorialCoordinate::new(ra, dec)?;
        let mut core = self.core.lock().await;
        core.ensure_unparked()?;
        self.cancel.reset();
        core.start_goto(GotoTarget::Equatorial(target), false).await
    }

    /// Tell the mount it is pointing at RA (hours) and Dec (degrees)
    pub async fn sync_to(&self, ra: f64, dec: f64) -> MountResult<()> {
        let target = EquatorialCoordinate::new(ra, dec)?;
        let mut core = self.core.lock().await;
        core.ensure_connected()?;
        core.ensure_unparked()?;
        if !core.tracking.mode().is_on() {
            return Err(MountError::InvalidOperation("cannot sync while tracking is off".to_string()));
        }
        if core.goto.is_active() {
            return Err(MountError::InvalidOperation("cannot sync while slewing".to_string()));
        }

        let position = core.current()?;
        let lst = core.lst();
        let frame = core.frame;

        if core.config.alignment.append_on_sync {
            let point = AlignmentPoint::new(&frame, &core.config.site, target, position, lst, core.clock.now());
            let index = core.model.add(point)?;
            core.sync_offset = AxisPosition::default();
            info!("Synced to {}: alignment point {} ({} stored)", target, index, core.model.len());
        } else {
            let (_, pier) = axis_to_equatorial(&frame, &position, lst);
            let raw = equatorial_to_axis(&frame, &target, lst, pier);
            let altaz = equatorial_to_altaz(&core.config.site, &target, lst);
            let corrected = core
                .model
                .catalog_to_mount(&frame, raw, pier, altaz, &core.config.alignment.mapping());
            core.sync_offset = position - corrected;
            info!("Synced to {}: offset {}", target, core.sync_offset);
        }
        Ok(())
    }

    /// Run an axis at `rate` degrees per second. Zero stops it and puts it
    /// back on the selected tracking rate.
    pub async fn move_axis(&self, axis: Axis, rate: f64) -> MountResult<()> {
        if !rate.is_finite() || rate.abs() > MAX_MOVE_RATE_DEG {
            return Err(MountError::InvalidData(format!(
                "move rate {} deg/s outside ±{}",
                rate, MAX_MOVE_RATE_DEG
            )));
        }
        let mut core = self.core.lock().await;
        core.ensure_connected()?;
        core.ensure_unparked()?;
        if core.goto.is_active() {
            return Err(MountError::InvalidOperation("cannot move an axis while slewing".to_string()));
        }

        let result = {
            let (motor, tracking) = core.motor_and_tracking()?;
            if rate == 0.0 {
                tracking.resume_axis(motor, axis).await
            } else {
                tracking.change_by_rate(motor, axis, rate * 3600.0).await
            }
        };
        match result {
            Ok(()) => {
                core.manual[axis.index()] = rate != 0.0;
                debug!("{} axis manual rate {} deg/s", axis, rate);
                Ok(())
            }
            Err(e) => Err(core.stop_after("move axis", e.into()).await),
        }
    }

    /// Goto the park position; the mount reports parked once it arrives
    pub async fn park(&self) -> MountResult<()> {
        let mut core = self.core.lock().await;
        core.ensure_connected()?;
        if core.parked || core.goto.is_parking() {
            return Ok(());
        }
        self.cancel.reset();
        let park = core.config.park_position;
        core.start_goto(GotoTarget::Axis(park), true).await?;
        Ok(())
    }

    pub async fn unpark(&self) -> MountResult<()> {
        let mut core = self.core.lock().await;
        core.ensure_connected()?;
        if core.parked {
            info!("Mount unparked");
        }
        core.parked = false;
        Ok(())
    }

    pub async fn set_tracking(&self, mode: TrackingMode) -> MountResult<()> {
        let mut core = self.core.lock().await;
        core.ensure_connected()?;
        if mode.is_on() {
            core.ensure_unparked()?;
        }

        if core.goto.is_active() {
            // Applied when the slew completes
            core.goto.set_resume(mode);
            core.tracking.select(mode);
            return Ok(());
        }

        let result = {
            let (motor, tracking) = core.motor_and_tracking()?;
            tracking.set_mode(motor, mode).await
        };
        match result {
            Ok(()) => {
                core.manual = [false; 2];
                info!("Tracking {}", mode);
                Ok(())
            }
            Err(e) => Err(core.stop_after("set tracking", e.into()).await),
        }
    }

    /// Track at the custom rates from the configuration
    pub async fn set_custom_tracking(&self) -> MountResult<()> {
        let mode = self.core.lock().await.config.tracking.custom_mode();
        self.set_tracking(mode).await
    }

    /// Stop any goto or manual move. Tracking continues in the mode selected
    /// before the slew.
    pub async fn abort_slew(&self) -> MountResult<()> {
        self.cancel.cancel();
        let result = self.core.lock().await.abort().await;
        self.cancel.reset();
        result
    }

    // ------------------------------------------------------------------------
    // Supervision
    // ------------------------------------------------------------------------

    /// Read the axes and advance any goto. Overlapping calls are skipped,
    /// not queued.
    pub async fn poll(&self) -> MountResult<PollOutcome> {
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            return Ok(PollOutcome::Skipped);
        };
        if self.cancel.is_cancelled() {
            return Ok(PollOutcome::Skipped);
        }

        let mut core = self.core.lock().await;
        if core.motor.is_none() {
            return Ok(PollOutcome::Disconnected);
        }

        let lst = core.lst();
        let readings = match core.read_axes().await {
            Ok(readings) => readings,
            Err(e) if core.goto.is_active() => {
                let (goto, mut ctx) = core.split(lst)?;
                return Err(goto.fail(&mut ctx, e).await);
            }
            Err(e) if core.manual.iter().any(|m| *m) => {
                return Err(core.stop_after("move axis", e).await);
            }
            Err(e) => return Err(e),
        };

        let tick = {
            let (goto, mut ctx) = core.split(lst)?;
            goto.tick(&mut ctx, &readings).await?
        };
        if let GotoTick::Completed { parked: true } = tick {
            core.parked = true;
            info!("Mount parked");
        }

        if !core.goto.is_active() && !core.manual.iter().any(|m| *m) {
            let (motor, tracking) = core.motor_and_tracking()?;
            if let Err(e) = tracking.correct_pec(motor, readings.position.ra).await {
                warn!("PEC rate update failed: {}", e);
            }
        }
        Ok(PollOutcome::Tick(tick))
    }

    /// Poll on a fixed interval until the returned handle is stopped
    pub fn spawn_poll_loop(&self) -> PollLoop {
        let mount = self.clone();
        let token = CancelToken::new();
        let stop = token.clone();
        let period = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if stop.is_cancelled() {
                    break;
                }
                match mount.poll().await {
                    Ok(PollOutcome::Tick(GotoTick::Completed { parked })) => {
                        debug!("Poll loop saw goto completion (parked: {})", parked);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Mount poll failed: {}", e),
                }
            }
            debug!("Poll loop stopped");
        });

        PollLoop { token, handle }
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    pub async fn status(&self) -> MountStatus {
        let core = self.core.lock().await;
        let lst = core.lst();
        let (position, pier, altaz) = match core.readings {
            Some(readings) => {
                let (coord, pier) = core.sky_position(&readings.position, lst);
                let altaz = equatorial_to_altaz(&core.config.site, &coord, lst);
                (Some(coord), Some(pier), Some(altaz))
            }
            None => (None, None, None),
        };
        MountStatus {
            connected: core.motor.is_some(),
            position,
            axis_position: core.readings.map(|r| r.position),
            pier,
            altaz,
            slewing: core.goto.is_active() || core.manual.iter().any(|m| *m),
            phase: core.goto.phase(),
            parked: core.parked,
            tracking: core.tracking.mode(),
            sidereal_time: lst,
        }
    }

    /// Corrected sky position as of the last poll
    pub async fn position(&self) -> MountResult<EquatorialCoordinate> {
        let core = self.core.lock().await;
        let current = core.current()?;
        Ok(core.sky_position(&current, core.lst()).0)
    }

    pub async fn axis_position(&self) -> MountResult<AxisPosition> {
        self.core.lock().await.current()
    }

    pub async fn pier_side(&self) -> MountResult<PierSide> {
        let core = self.core.lock().await;
        let current = core.current()?;
        Ok(axis_to_equatorial(&core.frame, &current, core.lst()).1)
    }

    pub async fn is_slewing(&self) -> bool {
        let core = self.core.lock().await;
        core.goto.is_active() || core.manual.iter().any(|m| *m)
    }

    pub async fn is_parked(&self) -> bool {
        self.core.lock().await.parked
    }

    pub async fn tracking_mode(&self) -> TrackingMode {
        self.core.lock().await.tracking.mode()
    }

    pub async fn sidereal_time(&self) -> f64 {
        self.core.lock().await.lst()
    }

    // ------------------------------------------------------------------------
    // Alignment
    // ------------------------------------------------------------------------

    pub async fn alignment_points(&self) -> Vec<AlignmentPoint> {
        self.core.lock().await.model.points().to_vec()
    }

    /// The whole model, for the host to persist
    pub async fn alignment_model(&self) -> AlignmentModel {
        self.core.lock().await.model.clone()
    }

    pub async fn load_alignment(&self, model: AlignmentModel) {
        let mut core = self.core.lock().await;
        info!("Loaded {} alignment points", model.len());
        core.model = model;
    }

    pub async fn remove_alignment_point(&self, index: usize) -> MountResult<AlignmentPoint> {
        Ok(self.core.lock().await.model.remove(index)?)
    }

    /// Drop every alignment point and the sync offset
    pub async fn clear_alignment(&self) {
        let mut core = self.core.lock().await;
        core.model.clear();
        core.sync_offset = AxisPosition::default();
    }
}

/// Handle to a running poll loop
pub struct PollLoop {
    token: CancelToken,
    handle: JoinHandle<()>,
}

impl PollLoop {
    /// Stop the loop and wait for its last poll to finish
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("Poll loop task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Holds the processing flag for one poll
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ProcessingGuard(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
