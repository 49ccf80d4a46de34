//! Unified error types for the Warden workspace.
//!
//! Startup failures of a remote command (unknown user, missing executable)
//! are not represented here: the daemon reports them in-band
//! as the sentinel exit status.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::JobId;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum WardenError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path (or endpoint) where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A peer violated the daemon socket protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The job id was never issued, or the job was already linked and reaped.
    #[error("unknown job: {id}")]
    UnknownJob {
        /// The job id that was looked up.
        id: JobId,
    },

    /// A resource pool has no free values left.
    #[error("{pool} pool is exhausted")]
    PoolExhausted {
        /// Name of the exhausted pool.
        pool: &'static str,
    },

    /// A specific pool value was requested but is already allocated.
    #[error("{pool} {value} is already taken")]
    ResourceTaken {
        /// Name of the pool.
        pool: &'static str,
        /// The value that is not free.
        value: u32,
    },

    /// An external quota tool failed or produced unparsable output.
    #[error("{tool} failed: {message}")]
    QuotaTool {
        /// Name of the tool that failed.
        tool: String,
        /// Description of the failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl WardenError {
    /// Wraps an I/O error with the path or endpoint it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, WardenError>;
