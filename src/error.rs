//! Error types for steadyflow operations.
//!
//! This module defines [`SteadyflowError`], the primary error type used
//! throughout the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Persistence and configuration failures surface as `SteadyflowError`
//! - Engine-internal faults are logged and absorbed; the engine handle only
//!   returns [`SteadyflowError::EngineClosed`] when its actor has stopped
//! - Use `anyhow::Error` (via `SteadyflowError::Other`) for unexpected errors

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for steadyflow operations.
#[derive(Debug, Error)]
pub enum SteadyflowError {
    /// Persisted state could not be encoded.
    #[error("Failed to encode state '{key}': {source}")]
    StateEncode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Persisted state exists but could not be decoded.
    #[error("Failed to decode state '{key}': {source}")]
    StateDecode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Failed to parse a configuration file.
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParseError { path: PathBuf, message: String },

    /// The engine actor is no longer running.
    #[error("Workflow engine is closed")]
    EngineClosed,

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for steadyflow operations.
pub type Result<T> = std::result::Result<T, SteadyflowError>;
