//! Tool identity: kinds, references, and cache keys.
//!
//! A cache key is the triple `(kind, name, version)`. Its on-disk form is the
//! relative path `<kind>/<name>/<version>`, so names and versions are
//! validated as single path components before they are ever joined.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// The three kinds of installable toolchain items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// The `protoc` compiler binary.
    Protoc,
    /// A `protoc-gen-*` code generator plugin.
    Plugin,
    /// A shared schema repository checkout.
    Repository,
}

impl ToolKind {
    /// All kinds, in install order.
    pub const ALL: [ToolKind; 3] = [ToolKind::Protoc, ToolKind::Repository, ToolKind::Plugin];

    /// The lowercase name used in config files and the cache layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Protoc => "protoc",
            ToolKind::Plugin => "plugin",
            ToolKind::Repository => "repository",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "protoc" => Ok(ToolKind::Protoc),
            "plugin" => Ok(ToolKind::Plugin),
            "repository" => Ok(ToolKind::Repository),
            other => Err(format!(
                "unknown kind '{other}' (expected protoc, plugin, or repository)"
            )),
        }
    }
}

/// A declared tool, independent of its version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolRef {
    pub kind: ToolKind,
    pub name: String,
    /// Where to fetch from: a Go package path, a git URL, or a release mirror.
    #[serde(default)]
    pub source: Option<String>,
}

impl ToolRef {
    pub fn new(kind: ToolKind, name: impl Into<String>) -> Self {
        ToolRef {
            kind,
            name: name.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl fmt::Display for ToolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Identifies one installable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub kind: ToolKind,
    pub name: String,
    pub version: String,
}

impl CacheKey {
    /// Build a key, rejecting names or versions that are not a single path
    /// component.
    pub fn new(kind: ToolKind, name: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let version = version.into();
        validate_component("name", &name)?;
        validate_component("version", &version)?;
        Ok(CacheKey {
            kind,
            name,
            version,
        })
    }

    /// `<kind>/<name>/<version>`, relative to the cache root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.kind.as_str())
            .join(&self.name)
            .join(&self.version)
    }

    /// Flat file name used for this key's lock file.
    pub fn lock_file_name(&self) -> String {
        format!("{}--{}--{}.lock", self.kind, self.name, self.version)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.name, self.version)
    }
}

/// A request to install one tool at one exact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub tool: ToolRef,
    pub version: String,
}

impl InstallRequest {
    pub fn new(tool: ToolRef, version: impl Into<String>) -> Self {
        InstallRequest {
            tool,
            version: version.into(),
        }
    }

    pub fn key(&self) -> Result<CacheKey> {
        CacheKey::new(self.tool.kind, &self.tool.name, &self.version)
    }
}

/// Check that `value` can be used verbatim as one path component.
pub fn validate_component(what: &'static str, value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value == "." || value == ".." {
        Some("must not be a relative path marker")
    } else if value.starts_with('.') {
        Some("must not start with '.'")
    } else if value.contains(['/', '\\', ':']) || value.chars().any(char::is_control) {
        Some("must not contain path separators or control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoreError::InvalidComponent {
            what,
            value: value.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
