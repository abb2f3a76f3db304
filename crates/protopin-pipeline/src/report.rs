//! Build report aggregating every target's outcome.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use protopin_core::{TargetState, ToolKind};

use crate::error::{PipelineError, Result};

/// Why a target did not reach `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A declared tool was unpinned or not installed.
    MissingTool {
        kind: ToolKind,
        name: String,
        version: String,
    },
    /// protoc exited unsuccessfully or could not be started.
    Compiler { diagnostics: String },
    /// The invocation deadline expired before the target finished.
    Timeout { timeout: Duration },
    /// A post-action of the target's group failed after it compiled.
    PostAction { action: String, error: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MissingTool {
                kind,
                name,
                version,
            } => write!(f, "{kind} '{name}' at '{version}' is not installed"),
            FailureReason::Compiler { diagnostics } => f.write_str(diagnostics.trim_end()),
            FailureReason::Timeout { timeout } => write!(f, "timed out after {timeout:?}"),
            FailureReason::PostAction { action, error } => {
                write!(f, "post-action {action} failed: {error}")
            }
        }
    }
}

/// A failed target and the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub target: PathBuf,
    pub reason: FailureReason,
}

/// Final state of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: PathBuf,
    /// Owning config file, `None` for the implicit config.
    pub config: Option<PathBuf>,
    pub state: TargetState,
    /// Whether protoc succeeded (or was planned, under dry-run).
    pub compiled: bool,
    pub failure: Option<TargetFailure>,
}

/// A post-action that failed, with the config that declared it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostActionFailure {
    pub config: PathBuf,
    pub action: String,
    pub error: String,
}

/// Outcome of one `compile` call.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub targets: Vec<TargetReport>,
    pub post_action_failures: Vec<PostActionFailure>,
    pub dry_run: bool,
}

impl BuildReport {
    /// Targets protoc compiled, including those whose post-actions failed.
    pub fn compiled(&self) -> usize {
        self.targets.iter().filter(|t| t.compiled).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetFailure> {
        self.targets.iter().filter_map(|t| t.failure.as_ref())
    }

    /// Failures of targets that never compiled. Post-action failures are
    /// reported once per action in `post_action_failures` instead.
    pub fn target_failures(&self) -> impl Iterator<Item = &TargetFailure> {
        self.failures()
            .filter(|f| !matches!(f.reason, FailureReason::PostAction { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none() && self.post_action_failures.is_empty()
    }

    /// Turn failures into the error the invocation should fail with.
    ///
    /// Unresolved tools are reported first since they mean tidy has not run,
    /// then timeouts, compile failures, and post-action failures.
    pub fn into_result(self) -> Result<BuildReport> {
        if let Some(FailureReason::MissingTool {
            kind,
            name,
            version,
        }) = self
            .failures()
            .map(|f| &f.reason)
            .find(|r| matches!(r, FailureReason::MissingTool { .. }))
        {
            return Err(PipelineError::MissingTool {
                kind: *kind,
                name: name.clone(),
                version: version.clone(),
            });
        }
        if let Some(FailureReason::Timeout { timeout }) = self
            .failures()
            .map(|f| &f.reason)
            .find(|r| matches!(r, FailureReason::Timeout { .. }))
        {
            return Err(PipelineError::Timeout { timeout: *timeout });
        }

        let failed = self
            .failures()
            .filter(|f| matches!(f.reason, FailureReason::Compiler { .. }))
            .count();
        if failed > 0 {
            return Err(PipelineError::Compile {
                failed,
                total: self.targets.len(),
            });
        }
        if !self.post_action_failures.is_empty() {
            return Err(PipelineError::PostAction {
                failures: self.post_action_failures.len(),
            });
        }
        Ok(self)
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let compiled = self.compiled();
        let noun = if compiled == 1 { "file" } else { "files" };
        if self.dry_run {
            write!(f, "{compiled} {noun} planned (dry run)")?;
        } else {
            write!(f, "{compiled} {noun} compiled")?;
        }

        let failed = self.target_failures().count();
        if failed > 0 {
            write!(f, ", {failed} failed")?;
        }
        if !self.post_action_failures.is_empty() {
            write!(
                f,
                ", {} post-action(s) failed",
                self.post_action_failures.len()
            )?;
        }
        for failure in self.target_failures() {
            write!(f, "\n  {}: {}", failure.target.display(), failure.reason)?;
        }
        for failure in &self.post_action_failures {
            write!(
                f,
                "\n  {} ({}): {}",
                failure.action,
                failure.config.display(),
                failure.error
            )?;
        }
        Ok(())
    }
}
