//! Motor controller access for SkyWatcher-protocol equatorial mounts
//!
//! Layers, bottom up:
//!
//! - [`transport`]: the half-duplex serial link, one locked request/response
//!   exchange at a time, with a single retry on timeout
//! - [`protocol`]: command framing, hex encodings and status decoding
//! - [`firmware`]: speed thresholds keyed by motor board version
//! - [`MotorController`]: the per-axis capability set the mount drives,
//!   implemented by [`SkyWatcherController`] for real hardware and by
//!   [`simulator::SimulatedMotor`] for tests

mod error;
pub mod firmware;
mod motor;
pub mod protocol;
pub mod simulator;
mod skywatcher;
pub mod transport;

pub use error::{ControllerFault, MotorError, MotorResult};
pub use firmware::{SpeedClass, SpeedProfile};
pub use motor::{Axis, AxisMotion, AxisStatus, MotorController};
pub use skywatcher::SkyWatcherController;
pub use transport::{SerialLink, SerialPortLink, Transport, TransportConfig};
