//! Config error types.

use std::path::PathBuf;

/// Errors raised while locating, parsing, or rewriting config files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file is not valid TOML.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The file is valid TOML but not a valid config.
    #[error("invalid config {path}: {message}")]
    Schema { path: PathBuf, message: String },

    /// I/O error with the path it happened on.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error from the shared primitives (atomic writes).
    #[error(transparent)]
    Core(#[from] protopin_core::CoreError),
}

impl ConfigError {
    pub(crate) fn schema(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ConfigError::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
