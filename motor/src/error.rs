//! Motor controller errors

use std::fmt;
use thiserror::Error;

use crate::motor::Axis;

/// Fault codes a SkyWatcher controller reports as `!n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerFault {
    UnknownCommand,
    CommandLength,
    MotorNotStopped,
    InvalidCharacter,
    NotInitialized,
    DriverSleeping,
    PecTrainingRunning,
    NoValidPecData,
    Other(u8),
}

impl ControllerFault {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ControllerFault::UnknownCommand,
            1 => ControllerFault::CommandLength,
            2 => ControllerFault::MotorNotStopped,
            3 => ControllerFault::InvalidCharacter,
            4 => ControllerFault::NotInitialized,
            5 => ControllerFault::DriverSleeping,
            7 => ControllerFault::PecTrainingRunning,
            8 => ControllerFault::NoValidPecData,
            other => ControllerFault::Other(other),
        }
    }
}

impl fmt::Display for ControllerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerFault::UnknownCommand => write!(f, "unknown command"),
            ControllerFault::CommandLength => write!(f, "command length error"),
            ControllerFault::MotorNotStopped => write!(f, "motor not stopped"),
            ControllerFault::InvalidCharacter => write!(f, "invalid character"),
            ControllerFault::NotInitialized => write!(f, "not initialized"),
            ControllerFault::DriverSleeping => write!(f, "driver sleeping"),
            ControllerFault::PecTrainingRunning => write!(f, "PEC training running"),
            ControllerFault::NoValidPecData => write!(f, "no valid PEC data"),
            ControllerFault::Other(code) => write!(f, "error code {}", code),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotorError {
    /// Port absent, closed or failing at the I/O level
    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("No response from {axis} axis after {attempts} attempts")]
    NoResponse { axis: Axis, attempts: u32 },

    #[error("Invalid response from {axis} axis: {response:?}")]
    InvalidResponse { axis: Axis, response: String },

    #[error("{axis} axis controller fault: {code}")]
    Controller { axis: Axis, code: ControllerFault },

    #[error("Motor controller not initialized")]
    NotInitialized,
}

impl MotorError {
    /// Whether repeating the same exchange may succeed.
    /// Only a timed-out exchange is worth repeating; I/O failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MotorError::NoResponse { .. } => true,
            MotorError::NotConnected(_) => false,
            MotorError::InvalidResponse { .. } => false,
            MotorError::Controller { .. } => false,
            MotorError::NotInitialized => false,
        }
    }
}

impl From<std::io::Error> for MotorError {
    fn from(err: std::io::Error) -> Self {
        MotorError::NotConnected(err.to_string())
    }
}

impl From<serialport::Error> for MotorError {
    fn from(err: serialport::Error) -> Self {
        MotorError::NotConnected(err.to_string())
    }
}

pub type MotorResult<T> = Result<T, MotorError>;
