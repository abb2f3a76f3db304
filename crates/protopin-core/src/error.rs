//! Core error types.

use std::path::PathBuf;
use std::time::Duration;

use crate::kind::ToolKind;

/// Errors raised by the shared primitives.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A version specifier could not be classified.
    #[error("invalid version specifier '{spec}' for {kind}: {reason}")]
    InvalidVersion {
        kind: ToolKind,
        spec: String,
        reason: String,
    },

    /// A tool name or version is unusable as a cache path component.
    #[error("invalid {what} '{value}': {reason}")]
    InvalidComponent {
        what: &'static str,
        value: String,
        reason: String,
    },

    /// The invocation deadline expired.
    #[error("operation exceeded the {timeout:?} timeout")]
    Timeout { timeout: Duration },

    /// I/O error with the path it happened on.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
