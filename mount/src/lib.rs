//! EQMOD-style SkyWatcher equatorial mount control
//!
//! [`EqMount`] is the host-facing handle: connect, slew, sync, park, track.
//! Gotos and tracking run on a [`MotorController`](eqmod_motor::MotorController)
//! and are supervised by a periodic [`EqMount::poll`], usually driven by
//! [`EqMount::spawn_poll_loop`].

pub mod clock;
pub mod config;
mod error;
pub mod goto;
pub mod logging;
mod mount;
pub mod tracking;

pub use clock::{CancelToken, Clock, FixedClock, SystemClock};
pub use config::{
    AlignmentSettings, ConnectionConfig, GotoTuning, MountConfig, RaLimits, TrackingSettings,
};
pub use error::{MotionAfterFailure, MountError, MountResult};
pub use goto::{GotoPhase, GotoPlan, GotoTarget, GotoTick, SlewStage};
pub use mount::{EqMount, MountStatus, PollLoop, PollOutcome, MAX_MOVE_RATE_DEG};
pub use tracking::{NoPec, PecCorrector, TrackingMode};

pub use eqmod_astro::{AxisPosition, EquatorialCoordinate, PierSide};
pub use eqmod_motor::Axis;
