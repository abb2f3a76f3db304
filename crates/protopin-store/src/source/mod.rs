//! Where tools come from.
//!
//! A [`ToolchainSource`] lists the published versions of a tool and fetches
//! one version into a staging directory. The store owns locking, digests and
//! publishing; sources only produce files.
//!
//! Every fetch leaves the same shape in the staging directory: executables
//! under `bin/`, protoc's bundled includes under `include/`, repositories as
//! a plain checkout.

mod git;
mod github;
mod go;
mod mirror;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;

use protopin_core::version::resolve_best;
use protopin_core::{ToolKind, ToolRef, VersionSpec};

use crate::error::{Result, StoreError};

pub use git::GitRepositorySource;
pub use github::GithubProtocSource;
pub use go::GoPluginSource;
pub use mirror::LocalMirror;

/// Lists and fetches versions of tools.
#[async_trait]
pub trait ToolchainSource: Send + Sync {
    /// Every published version of `tool`, in any order.
    async fn list_versions(&self, tool: &ToolRef) -> Result<Vec<String>>;

    /// Resolve a specifier to one exact version.
    ///
    /// The default picks the best match from [`list_versions`]. Sources with
    /// their own notion of references (git) override it.
    ///
    /// [`list_versions`]: ToolchainSource::list_versions
    async fn resolve(&self, tool: &ToolRef, spec: &VersionSpec) -> Result<String> {
        if let Some(pinned) = spec.pinned() {
            return Ok(pinned.to_string());
        }
        let available = self.list_versions(tool).await?;
        resolve_best(&available, spec).ok_or_else(|| StoreError::NoMatchingVersion {
            tool: tool.to_string(),
            spec: describe(spec),
        })
    }

    /// Fetch `version` of `tool` into the empty directory `dest`.
    async fn fetch(&self, tool: &ToolRef, version: &str, dest: &Path) -> Result<()>;
}

pub(crate) fn describe(spec: &VersionSpec) -> String {
    match spec {
        VersionSpec::Latest => "latest".to_string(),
        VersionSpec::Exact(v) | VersionSpec::Reference(v) => v.clone(),
        VersionSpec::Requirement(req) => req.to_string(),
    }
}

/// Dispatches to one source per tool kind.
#[derive(Clone)]
pub struct DefaultSource {
    protoc: Arc<dyn ToolchainSource>,
    plugin: Arc<dyn ToolchainSource>,
    repository: Arc<dyn ToolchainSource>,
}

impl DefaultSource {
    /// GitHub releases for protoc, `go install` for plugins, git for
    /// repositories.
    pub fn new() -> Self {
        DefaultSource {
            protoc: Arc::new(GithubProtocSource::new()),
            plugin: Arc::new(GoPluginSource::new()),
            repository: Arc::new(GitRepositorySource::new()),
        }
    }

    pub fn with_protoc(mut self, source: Arc<dyn ToolchainSource>) -> Self {
        self.protoc = source;
        self
    }

    pub fn with_plugin(mut self, source: Arc<dyn ToolchainSource>) -> Self {
        self.plugin = source;
        self
    }

    pub fn with_repository(mut self, source: Arc<dyn ToolchainSource>) -> Self {
        self.repository = source;
        self
    }

    fn for_kind(&self, kind: ToolKind) -> &dyn ToolchainSource {
        match kind {
            ToolKind::Protoc => self.protoc.as_ref(),
            ToolKind::Plugin => self.plugin.as_ref(),
            ToolKind::Repository => self.repository.as_ref(),
        }
    }
}

impl Default for DefaultSource {
    fn default() -> Self {
        DefaultSource::new()
    }
}

#[async_trait]
impl ToolchainSource for DefaultSource {
    async fn list_versions(&self, tool: &ToolRef) -> Result<Vec<String>> {
        self.for_kind(tool.kind).list_versions(tool).await
    }

    async fn resolve(&self, tool: &ToolRef, spec: &VersionSpec) -> Result<String> {
        self.for_kind(tool.kind).resolve(tool, spec).await
    }

    async fn fetch(&self, tool: &ToolRef, version: &str, dest: &Path) -> Result<()> {
        self.for_kind(tool.kind).fetch(tool, version, dest).await
    }
}

/// Run an external program to completion and return its stdout.
///
/// The child is killed if the returned future is dropped.
pub(crate) async fn run_tool(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    envs: &[(&str, PathBuf)],
) -> Result<String> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }

    tracing::debug!(program, ?args, "running");
    let output = cmd.output().await.map_err(|e| StoreError::Command {
        program: program.to_string(),
        detail: e.to_string(),
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(command_failure(program, &output.status.to_string(), stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Classify a failed tool run. Network trouble reported by git or go is
/// transient and worth retrying.
fn command_failure(program: &str, status: &str, stderr: &str) -> StoreError {
    const TRANSIENT: [&str; 6] = [
        "could not resolve host",
        "connection timed out",
        "connection reset",
        "temporary failure",
        "tls handshake timeout",
        "i/o timeout",
    ];
    let lower = stderr.to_ascii_lowercase();
    if TRANSIENT.iter().any(|needle| lower.contains(needle)) {
        StoreError::Network {
            url: program.to_string(),
            detail: stderr.to_string(),
        }
    } else {
        StoreError::Command {
            program: program.to_string(),
            detail: format!("{status}: {stderr}"),
        }
    }
}
