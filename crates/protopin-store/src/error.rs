//! Store error types.

use std::path::PathBuf;
use std::time::Duration;

use protopin_core::{CacheKey, CoreError};

/// Errors raised by the toolchain store and its sources.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key was never installed, or its entry is not trustworthy.
    #[error("{key} is not installed (run `protopin tidy` first)")]
    NotFound { key: CacheKey },

    /// Fetching or publishing an entry failed.
    #[error("failed to install {key}: {detail}")]
    Install { key: CacheKey, detail: String },

    /// A freshly published entry does not match its digest.
    #[error("integrity check failed for {key}: expected {expected}, got {actual}")]
    Integrity {
        key: CacheKey,
        expected: String,
        actual: String,
    },

    /// No published version satisfies the specifier.
    #[error("no version of {tool} satisfies '{spec}'")]
    NoMatchingVersion { tool: String, spec: String },

    /// A transient network failure.
    #[error("request to {url} failed: {detail}")]
    Network { url: String, detail: String },

    /// An external program failed.
    #[error("`{program}` failed: {detail}")]
    Command { program: String, detail: String },

    /// The source cannot serve this request.
    #[error("unsupported: {detail}")]
    Unsupported { detail: String },

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

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the shared primitives.
    #[error(transparent)]
    Core(CoreError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Network { .. })
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Timeout { timeout } => StoreError::Timeout { timeout },
            other => StoreError::Core(other),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
