//! Loaded config model.
//!
//! Every path in these types is absolute: the loader resolves relative paths
//! against the directory of the file that declared them.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use protopin_core::{CacheKey, InstallRequest, ToolKind, ToolRef, VersionSpec};

/// File name looked up in every ancestor directory.
pub const CONFIG_FILE_NAME: &str = "protopin.toml";

/// One declared tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigItem {
    pub tool: ToolRef,
    /// The version as written in the file.
    pub specifier: String,
    /// Set exactly when `specifier` is already an exact pin.
    pub resolved: Option<String>,
    /// Repository sub-directory added to the include path.
    pub include: Option<String>,
    /// Byte range of the version value inside the file, quotes included.
    pub span: Option<Range<usize>>,
}

impl ConfigItem {
    pub fn kind(&self) -> ToolKind {
        self.tool.kind
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }

    /// Re-classify the specifier. Loading already validated it.
    pub fn spec(&self) -> protopin_core::Result<VersionSpec> {
        VersionSpec::parse(self.tool.kind, &self.specifier)
    }

    pub fn is_pinned(&self) -> bool {
        self.resolved.is_some()
    }

    /// The install request for this item, if it is pinned.
    pub fn install_request(&self) -> Option<InstallRequest> {
        self.resolved
            .as_ref()
            .map(|v| InstallRequest::new(self.tool.clone(), v.clone()))
    }

    /// The cache key for this item, if it is pinned.
    pub fn cache_key(&self) -> Option<CacheKey> {
        let version = self.resolved.as_ref()?;
        CacheKey::new(self.tool.kind, &self.tool.name, version).ok()
    }
}

/// `[compile]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileSettings {
    /// Arguments passed to protoc verbatim.
    pub options: Vec<String>,
    /// Extra `-I` directories, searched first.
    pub import_paths: Vec<PathBuf>,
    /// Working directory for protoc.
    pub work_dir: PathBuf,
}

impl CompileSettings {
    pub fn for_dir(dir: &Path) -> Self {
        CompileSettings {
            options: Vec::new(),
            import_paths: Vec::new(),
            work_dir: dir.to_path_buf(),
        }
    }
}

/// A `[[post_action]]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Run a program with arguments; the first element is the program.
    Command { args: Vec<String> },
    /// Run a script through the platform shell.
    Shell { script: String },
    Copy { from: PathBuf, to: PathBuf },
    Move { from: PathBuf, to: PathBuf },
    Remove { path: PathBuf },
}

impl PostAction {
    pub fn kind(&self) -> &'static str {
        match self {
            PostAction::Command { .. } => "command",
            PostAction::Shell { .. } => "shell",
            PostAction::Copy { .. } => "copy",
            PostAction::Move { .. } => "move",
            PostAction::Remove { .. } => "remove",
        }
    }
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostAction::Command { args } => write!(f, "command `{}`", args.join(" ")),
            PostAction::Shell { script } => write!(f, "shell `{script}`"),
            PostAction::Copy { from, to } => {
                write!(f, "copy {} -> {}", from.display(), to.display())
            }
            PostAction::Move { from, to } => {
                write!(f, "move {} -> {}", from.display(), to.display())
            }
            PostAction::Remove { path } => write!(f, "remove {}", path.display()),
        }
    }
}

/// A loaded `protopin.toml`, or the implicit config used where none exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `None` for the implicit config.
    pub path: Option<PathBuf>,
    /// Directory the config governs (the file's parent).
    pub dir: PathBuf,
    /// Stop the ancestor walk at this file.
    pub root: bool,
    /// Restricts governance to these sub-directories when non-empty.
    pub scopes: Vec<PathBuf>,
    pub items: Vec<ConfigItem>,
    pub compile: CompileSettings,
    pub post_actions: Vec<PostAction>,
}

impl Config {
    /// Config for a directory that no file governs: no declared tools and
    /// default compile settings. The compiler falls back to the system protoc.
    pub fn implicit(dir: &Path) -> Self {
        Config {
            path: None,
            dir: dir.to_path_buf(),
            root: false,
            scopes: Vec::new(),
            items: Vec::new(),
            compile: CompileSettings::for_dir(dir),
            post_actions: Vec::new(),
        }
    }

    pub fn is_implicit(&self) -> bool {
        self.path.is_none()
    }

    /// Whether this config owns files at `target`.
    pub fn governs(&self, target: &Path) -> bool {
        if !target.starts_with(&self.dir) {
            return false;
        }
        self.scopes.is_empty() || self.scopes.iter().any(|scope| target.starts_with(scope))
    }

    pub fn item(&self, kind: ToolKind, name: &str) -> Option<&ConfigItem> {
        self.items
            .iter()
            .find(|item| item.kind() == kind && item.name() == name)
    }

    /// The declared protoc, if any.
    pub fn protoc(&self) -> Option<&ConfigItem> {
        self.items.iter().find(|item| item.kind() == ToolKind::Protoc)
    }

    /// Items of one kind, in declaration order.
    pub fn items_of(&self, kind: ToolKind) -> impl Iterator<Item = &ConfigItem> {
        self.items.iter().filter(move |item| item.kind() == kind)
    }

    /// Whether every declared item is pinned.
    pub fn is_tidied(&self) -> bool {
        self.items.iter().all(ConfigItem::is_pinned)
    }

    /// Path for messages: the file, or the governed directory when implicit.
    pub fn display_path(&self) -> &Path {
        self.path.as_deref().unwrap_or(&self.dir)
    }
}
