//! Error types for the Nebula GPU core
//!
//! This module defines the error types used throughout the command
//! submission core, covering contract violations, capacity exhaustion
//! and native backend failures.

use std::fmt;

/// Result type for Nebula GPU core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Nebula GPU core errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Programming-contract violation (encoding outside Encoding state,
    /// unbalanced debug groups, commit from a wrong state, ...)
    StateViolation(String),

    /// Descriptor or query-slot heap is full and deferred allocation is disabled
    OutOfCapacity(String),

    /// Invalid argument passed by the caller (unknown binding name,
    /// zero-length range reservation, empty command list set, ...)
    InvalidArgument(String),

    /// Initialization failed (device, queue worker, subsystems)
    InitializationFailed(String),

    /// Native backend failure carrying the native error code
    BackendError { code: i64, message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StateViolation(msg) => write!(f, "State violation: {}", msg),
            Error::OutOfCapacity(msg) => write!(f, "Out of capacity: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::BackendError { code, message } => {
                write!(f, "Backend error {}: {}", code, message)
            }
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
