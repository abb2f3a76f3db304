//! Pipeline error types.

use std::path::PathBuf;
use std::time::Duration;

use protopin_config::ConfigError;
use protopin_core::{CoreError, ToolKind};
use protopin_store::StoreError;

/// Errors raised by tidy and compile.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Version lookups for a config did not finish before the deadline. The
    /// file was not modified.
    #[error("tidying {path} exceeded the {timeout:?} timeout; the file was left unchanged")]
    TidyTimeout { path: PathBuf, timeout: Duration },

    /// The invocation deadline expired outside of a config tidy.
    #[error("operation exceeded the {timeout:?} timeout")]
    Timeout { timeout: Duration },

    /// A declared tool is unpinned or not installed.
    #[error("{kind} '{name}' at '{version}' is not installed (run `protopin tidy` first)")]
    MissingTool {
        kind: ToolKind,
        name: String,
        version: String,
    },

    /// One or more targets failed to compile.
    #[error("{failed} of {total} files failed to compile")]
    Compile { failed: usize, total: usize },

    /// One or more post-actions failed. Compiled output was kept.
    #[error("{failures} post-action(s) failed")]
    PostAction { failures: usize },

    /// A target was moved along an edge the state machine does not have.
    #[error("invalid state transition for {target}: {from} -> {to}")]
    InvalidTransition {
        target: PathBuf,
        from: protopin_core::TargetState,
        to: protopin_core::TargetState,
    },

    /// I/O error with the path it happened on.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Core(CoreError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout { timeout } => PipelineError::Timeout { timeout },
            other => PipelineError::Store(other),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Timeout { timeout } => PipelineError::Timeout { timeout },
            other => PipelineError::Core(other),
        }
    }
}

impl PipelineError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout { .. } | PipelineError::TidyTimeout { .. }
        )
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
