//! Error taxonomy for profiling sessions
//!
//! Disabled profiling is never an error: every operation silently becomes a
//! no-op. Errors raised by the profiled work itself never pass through here.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigField;
use crate::session::SessionState;

/// Errors that can occur while resolving configuration or driving a session
#[derive(Error, Debug)]
pub enum ProfilingError {
    /// A configuration value was present but malformed
    #[error("Invalid value for {field}: {value:?}")]
    ConfigParse { field: ConfigField, value: String },

    /// A session method was called in a state that does not allow it
    #[error("Cannot {operation} a session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The call-graph artifact could not be persisted
    #[error("Failed to write artifact {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A call-graph artifact could not be loaded
    #[error("Failed to read artifact {}: {reason}", path.display())]
    ArtifactRead { path: PathBuf, reason: String },

    /// Another session already holds the process-wide recorder
    #[error("Call-graph recorder is already engaged by another session")]
    RecorderBusy,
}

/// Result type for profiling operations
pub type Result<T> = std::result::Result<T, ProfilingError>;
