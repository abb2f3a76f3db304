//! The protopin pipeline: tidy, install, compile.
//!
//! [`tidy_config`] pins every floating version in the configs governing a
//! set of targets and installs the pinned tools. [`Compiler::compile`] then
//! runs protoc with exactly those tools and never resolves or fetches
//! anything itself, so compiling before tidying fails with
//! [`PipelineError::MissingTool`].

pub mod action;
pub mod compile;
pub mod error;
pub mod plan;
pub mod report;
pub mod tidy;

#[cfg(test)]
pub(crate) mod testutil;

pub use action::run_post_actions;
pub use compile::{system_protoc, Compiler};
pub use error::{PipelineError, Result};
pub use plan::BuildPlan;
pub use report::{BuildReport, FailureReason, PostActionFailure, TargetFailure, TargetReport};
pub use tidy::{tidy_config, tidy_config_file, tidy_configs, TidyOutcome};
