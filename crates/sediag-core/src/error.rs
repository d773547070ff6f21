//! Unified error types for the sediag ecosystem
//!
//! This module provides a common error type [`SediagError`] that can
//! represent errors from any part of the system. Domain-specific failures
//! are converted to `SediagError` for uniform handling at API boundaries.

use thiserror::Error;

use crate::BusId;

/// Unified error type for all sediag operations.
#[derive(Error, Debug)]
pub enum SediagError {
    /// I/O errors (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors (knowledge mutations, malformed measurements)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Oracle/solver errors (hard failures, not non-convergence)
    #[error("Solver error: {0}")]
    Solver(String),

    /// Oracle result is missing an entry for a known measurement id
    #[error("Desynchronization: oracle result has no entry for measurement #{measurement_id}")]
    Desync { measurement_id: usize },

    /// Network structure errors (unknown bus/branch ids)
    #[error("Network error: {0}")]
    Network(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

impl SediagError {
    /// Validation error for a bus id that does not exist in the network.
    pub fn unknown_bus(bus: BusId) -> Self {
        SediagError::Validation(format!("{bus} does not exist in the network"))
    }
}

/// Convenience type alias for Results using SediagError.
pub type SediagResult<T> = Result<T, SediagError>;

impl From<anyhow::Error> for SediagError {
    fn from(err: anyhow::Error) -> Self {
        SediagError::Other(err.to_string())
    }
}

impl From<String> for SediagError {
    fn from(s: String) -> Self {
        SediagError::Other(s)
    }
}

impl From<&str> for SediagError {
    fn from(s: &str) -> Self {
        SediagError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for SediagError {
    fn from(err: serde_json::Error) -> Self {
        SediagError::Parse(err.to_string())
    }
}
