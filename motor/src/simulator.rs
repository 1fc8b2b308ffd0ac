//! Simulated motor controller
//!
//! Advances one "tick" per status query: constant-rate axes move by
//! `rate * tick_secs`, and a goto lands on its target (plus an optional
//! pointing error) after a fixed number of polls. Every call is logged so
//! tests can assert on the command sequence. Clones share state.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{MotorError, MotorResult};
use crate::firmware::{SpeedClass, SpeedProfile};
use crate::motor::{Axis, AxisMotion, AxisStatus, MotorController};

#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Initialize,
    SlewAtRate { axis: Axis, rate: f64, class: SpeedClass },
    ChangeRate { axis: Axis, rate: f64, class: SpeedClass },
    SlewTo { axis: Axis, target: f64, slowdown: f64 },
    Stop(Axis),
    SetPosition { axis: Axis, position: f64 },
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub steps_per_rev: u32,
    pub firmware: u32,
    /// Status polls a goto stays busy for
    pub goto_polls: u32,
    /// Seconds of constant-rate motion per status poll
    pub tick_secs: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            steps_per_rev: 9_024_000,
            firmware: 0x0302,
            goto_polls: 2,
            tick_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SimMotion {
    Stopped,
    Rate(f64),
    Goto { target: f64, polls_left: u32 },
}

#[derive(Debug, Clone, Copy)]
struct SimAxis {
    position: f64,
    motion: SimMotion,
    high_speed: bool,
    forward: bool,
}

impl Default for SimAxis {
    fn default() -> Self {
        Self {
            position: 0.0,
            motion: SimMotion::Stopped,
            high_speed: false,
            forward: true,
        }
    }
}

#[derive(Debug)]
struct SimState {
    config: SimulatorConfig,
    axes: [SimAxis; 2],
    initialized: bool,
    log: Vec<SimCommand>,
    goto_error: [f64; 2],
    never_settle: bool,
    calls: usize,
    failure: Option<(usize, MotorError)>,
}

/// In-memory [`MotorController`]
#[derive(Debug, Clone)]
pub struct SimulatedMotor {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedMotor {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SimulatedMotor {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                config,
                axes: [SimAxis::default(); 2],
                initialized: false,
                log: Vec::new(),
                goto_error: [0.0; 2],
                never_settle: false,
                calls: 0,
                failure: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic in another test thread must not hide this one's state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Offset added to the target when a goto on `axis` lands
    pub fn set_goto_error(&self, axis: Axis, error: f64) {
        self.lock().goto_error[axis.index()] = error;
    }

    /// Keep gotos busy forever
    pub fn set_never_settle(&self, never: bool) {
        self.lock().never_settle = never;
    }

    /// Fail the call made after `calls` further successful calls
    pub fn fail_after(&self, calls: usize, error: MotorError) {
        let mut state = self.lock();
        let at = state.calls + calls;
        state.failure = Some((at, error));
    }

    pub fn position(&self, axis: Axis) -> f64 {
        self.lock().axes[axis.index()].position
    }

    pub fn set_axis_position(&self, axis: Axis, position: f64) {
        self.lock().axes[axis.index()].position = position;
    }

    pub fn is_moving(&self, axis: Axis) -> bool {
        self.lock().axes[axis.index()].motion != SimMotion::Stopped
    }

    /// Current constant rate of an axis, zero unless slewing at a rate
    pub fn rate(&self, axis: Axis) -> f64 {
        match self.lock().axes[axis.index()].motion {
            SimMotion::Rate(rate) => rate,
            _ => 0.0,
        }
    }

    pub fn commands(&self) -> Vec<SimCommand> {
        self.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().log.clear();
    }

    fn begin(&self, needs_init: bool) -> MotorResult<MutexGuard<'_, SimState>> {
        let mut state = self.lock();
        let call = state.calls;
        state.calls += 1;

        if state.failure.as_ref().map(|(at, _)| *at) == Some(call) {
            if let Some((_, error)) = state.failure.take() {
                return Err(error);
            }
        }
        if needs_init && !state.initialized {
            return Err(MotorError::NotInitialized);
        }
        Ok(state)
    }
}

impl SimState {
    fn tick(&mut self, axis: Axis) {
        let tick = self.config.tick_secs;
        let error = self.goto_error[axis.index()];
        let never_settle = self.never_settle;
        let a = &mut self.axes[axis.index()];

        match a.motion {
            SimMotion::Stopped => {}
            SimMotion::Rate(rate) => a.position += rate * tick,
            SimMotion::Goto { .. } if never_settle => {}
            SimMotion::Goto { target, polls_left } => {
                if polls_left <= 1 {
                    a.position = target + error;
                    a.motion = SimMotion::Stopped;
                } else {
                    a.motion = SimMotion::Goto {
                        target,
                        polls_left: polls_left - 1,
                    };
                }
            }
        }
    }
}

#[async_trait]
impl MotorController for SimulatedMotor {
    async fn initialize(&mut self) -> MotorResult<()> {
        let mut state = self.begin(false)?;
        state.initialized = true;
        state.log.push(SimCommand::Initialize);
        Ok(())
    }

    async fn slew_at_rate(&mut self, axis: Axis, rate: f64, class: SpeedClass) -> MotorResult<()> {
        let mut state = self.begin(true)?;
        state.log.push(SimCommand::SlewAtRate { axis, rate, class });
        let a = &mut state.axes[axis.index()];
        a.motion = if rate == 0.0 {
            SimMotion::Stopped
        } else {
            SimMotion::Rate(rate)
        };
        a.high_speed = class == SpeedClass::High;
        a.forward = rate >= 0.0;
        Ok(())
    }

    async fn change_rate(&mut self, axis: Axis, rate: f64, class: SpeedClass) -> MotorResult<()> {
        let mut state = self.begin(true)?;
        state.log.push(SimCommand::ChangeRate { axis, rate, class });
        let a = &mut state.axes[axis.index()];
        if let SimMotion::Rate(_) = a.motion {
            a.motion = SimMotion::Rate(rate);
        }
        Ok(())
    }

    async fn slew_to(&mut self, axis: Axis, target: f64, slowdown: f64) -> MotorResult<()> {
        let mut state = self.begin(true)?;
        state.log.push(SimCommand::SlewTo {
            axis,
            target,
            slowdown,
        });
        let polls = state.config.goto_polls.max(1);
        let a = &mut state.axes[axis.index()];
        a.forward = target >= a.position;
        a.high_speed = true;
        a.motion = SimMotion::Goto {
            target,
            polls_left: polls,
        };
        Ok(())
    }

    async fn stop(&mut self, axis: Axis) -> MotorResult<()> {
        let mut state = self.begin(true)?;
        state.log.push(SimCommand::Stop(axis));
        state.axes[axis.index()].motion = SimMotion::Stopped;
        Ok(())
    }

    async fn set_position(&mut self, axis: Axis, position: f64) -> MotorResult<()> {
        let mut state = self.begin(true)?;
        state.log.push(SimCommand::SetPosition { axis, position });
        state.axes[axis.index()].position = position;
        Ok(())
    }

    async fn get_position(&self, axis: Axis) -> MotorResult<f64> {
        let state = self.begin(true)?;
        Ok(state.axes[axis.index()].position)
    }

    async fn get_status(&self, axis: Axis) -> MotorResult<AxisStatus> {
        let mut state = self.begin(false)?;
        state.tick(axis);
        let a = state.axes[axis.index()];
        Ok(AxisStatus {
            motion: match a.motion {
                SimMotion::Stopped => AxisMotion::Stopped,
                SimMotion::Rate(_) => AxisMotion::Slewing,
                SimMotion::Goto { .. } => AxisMotion::SlewingTo,
            },
            high_speed: a.high_speed,
            forward: a.forward,
            initialized: state.initialized,
        })
    }

    fn steps_per_revolution(&self, _axis: Axis) -> u32 {
        self.lock().config.steps_per_rev
    }

    fn speed_profile(&self) -> SpeedProfile {
        SpeedProfile::for_firmware(self.lock().config.firmware)
    }
}
