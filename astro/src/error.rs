//! Error types for coordinate and pointing-model math

use thiserror::Error;

/// Errors raised by coordinate validation and the alignment solvers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AstroError {
    #[error("Invalid coordinate: {name} = {value} (valid: {min} to {max})")]
    InvalidCoordinate {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Not enough alignment points: need {needed}, have {available}")]
    NotEnoughPoints { needed: usize, available: usize },

    #[error("Singular matrix while solving {context}: determinant={determinant:.6e}")]
    SingularMatrix {
        context: &'static str,
        determinant: f64,
    },

    #[error("Alignment model is full ({max} points)")]
    ModelFull { max: usize },

    #[error("No alignment point at index {0}")]
    NoSuchPoint(usize),
}

/// Result type for astro math
pub type AstroResult<T> = Result<T, AstroError>;
