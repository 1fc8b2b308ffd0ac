//! Mount-level errors

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use eqmod_astro::AstroError;
use eqmod_motor::{Axis, MotorError};

/// What the motors were left doing after a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAfterFailure {
    /// Both axes acknowledged a stop
    Stopped,
    /// The stop could not be confirmed; the mount may still be moving
    Unknown,
}

impl fmt::Display for MotionAfterFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionAfterFailure::Stopped => write!(f, "motors stopped"),
            MotionAfterFailure::Unknown => write!(f, "motor state unknown"),
        }
    }
}

#[derive(Error, Debug)]
pub enum MountError {
    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("No response from {axis} axis")]
    NoResponse { axis: Axis },

    /// A coordinate, rate or reply outside its valid range
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The request is not allowed in the current mount state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Timeout: {operation} did not complete within {duration:?}")]
    Timeout { operation: String, duration: Duration },

    /// A motion operation failed part way. The motors were told to stop and
    /// `left` records whether they acknowledged.
    #[error("{operation} aborted ({left}): {source}")]
    Aborted {
        operation: String,
        left: MotionAfterFailure,
        source: Box<MountError>,
    },
}

impl MountError {
    pub fn aborted(operation: impl Into<String>, left: MotionAfterFailure, source: MountError) -> Self {
        MountError::Aborted {
            operation: operation.into(),
            left,
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through any `Aborted` wrapper
    pub fn root(&self) -> &MountError {
        match self {
            MountError::Aborted { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<MotorError> for MountError {
    fn from(err: MotorError) -> Self {
        match err {
            MotorError::NotConnected(msg) => MountError::NotConnected(msg),
            MotorError::NotInitialized => MountError::NotConnected("motor controller not initialized".to_string()),
            MotorError::NoResponse { axis, .. } => MountError::NoResponse { axis },
            MotorError::InvalidResponse { .. } => MountError::InvalidData(err.to_string()),
            MotorError::Controller { .. } => MountError::Device(err.to_string()),
        }
    }
}

impl From<AstroError> for MountError {
    fn from(err: AstroError) -> Self {
        match err {
            AstroError::InvalidCoordinate { .. } | AstroError::SingularMatrix { .. } => {
                MountError::InvalidData(err.to_string())
            }
            AstroError::NotEnoughPoints { .. } | AstroError::ModelFull { .. } | AstroError::NoSuchPoint(_) => {
                MountError::InvalidOperation(err.to_string())
            }
        }
    }
}

pub type MountResult<T> = Result<T, MountError>;
