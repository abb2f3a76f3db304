//! Per-target compile state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a compile target is in its lifecycle.
///
/// ```text
/// Pending ─┬─> NotTidied ──> Failed
///          └─> Tidied ─> Planned ─> Compiled ─┬─> PostActionsRun ─> Done
///                │          │          │      └─> PostActionsSkipped ─> Done
///                └──────────┴──────────┴──────────> Failed (also from PostActionsRun)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    NotTidied,
    Tidied,
    Planned,
    Compiled,
    PostActionsRun,
    PostActionsSkipped,
    Done,
    Failed,
}

impl TargetState {
    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TargetState) -> bool {
        use TargetState::*;
        matches!(
            (self, next),
            (Pending, NotTidied)
                | (Pending, Tidied)
                | (NotTidied, Failed)
                | (Tidied, Planned)
                | (Tidied, Failed)
                | (Planned, Compiled)
                | (Planned, Failed)
                | (Compiled, PostActionsRun)
                | (Compiled, PostActionsSkipped)
                | (Compiled, Failed)
                | (PostActionsRun, Done)
                | (PostActionsRun, Failed)
                | (PostActionsSkipped, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TargetState::Done | TargetState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetState::Pending => "pending",
            TargetState::NotTidied => "not-tidied",
            TargetState::Tidied => "tidied",
            TargetState::Planned => "planned",
            TargetState::Compiled => "compiled",
            TargetState::PostActionsRun => "post-actions-run",
            TargetState::PostActionsSkipped => "post-actions-skipped",
            TargetState::Done => "done",
            TargetState::Failed => "failed",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
