//! Compiler orchestration.
//!
//! Targets are grouped by owning config. Each group gets one [`BuildPlan`]
//! and every target in it one protoc invocation; invocations across all
//! groups share a concurrency bound. A failing target never stops the
//! others, and post-actions run only for groups where every target compiled.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use protopin_config::{ConfigChain, ConfigItem, Locator};
use protopin_core::{CoreError, Event, ExecContext, Observer, TargetState};
use protopin_store::ToolchainStore;

use crate::action::run_post_actions;
use crate::error::{PipelineError, Result};
use crate::plan::BuildPlan;
use crate::report::{BuildReport, FailureReason, TargetFailure, TargetReport};

/// The first `protoc` on `PATH`, used for directories no config governs.
pub fn system_protoc() -> Option<PathBuf> {
    let name = format!("protoc{}", std::env::consts::EXE_SUFFIX);
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
}

/// Runs protoc over targets using tools already in the store.
pub struct Compiler<'a> {
    store: &'a ToolchainStore,
    system_protoc: Option<PathBuf>,
}

impl<'a> Compiler<'a> {
    pub fn new(store: &'a ToolchainStore) -> Self {
        Compiler {
            store,
            system_protoc: None,
        }
    }

    /// protoc for targets under the implicit config. Without one those
    /// targets fail with a missing tool.
    pub fn with_system_protoc(mut self, protoc: Option<PathBuf>) -> Self {
        self.system_protoc = protoc;
        self
    }

    /// Compile every target and report each one's final state.
    ///
    /// Per-target failures are recorded in the report rather than returned;
    /// use [`BuildReport::into_result`] to fail on them. Errors returned here
    /// are config errors and internal faults.
    pub async fn compile(
        &self,
        ctx: &ExecContext,
        observer: &dyn Observer,
        targets: &[PathBuf],
    ) -> Result<BuildReport> {
        let mut groups = self.group(observer, targets)?;

        let mut jobs = Vec::new();
        for (gi, group) in groups.iter_mut().enumerate() {
            if let Some(plan) = self.plan_group(observer, group)? {
                let plan = Arc::new(plan);
                for (ri, run) in group.runs.iter().enumerate() {
                    jobs.push((gi, ri, Arc::clone(&plan), run.target.clone()));
                }
            }
        }

        let total = jobs.len();
        let outcomes: Vec<_> = stream::iter(jobs.into_iter().map(|(gi, ri, plan, target)| async move {
            let outcome = run_target(ctx, observer, &plan, &target).await;
            (gi, ri, outcome)
        }))
        .buffer_unordered(ctx.concurrency)
        .collect()
        .await;
        observer.on_event(&Event::Progress {
            stage: "compile",
            done: outcomes.len(),
            total,
        });

        for (gi, ri, outcome) in outcomes {
            let run = &mut groups[gi].runs[ri];
            match outcome {
                Ok(()) => {
                    run.advance(observer, TargetState::Compiled)?;
                    run.compiled = true;
                }
                Err(reason) => run.fail(observer, reason)?,
            }
        }

        let mut report = BuildReport {
            dry_run: ctx.dry_run,
            ..BuildReport::default()
        };
        for group in &mut groups {
            self.finish_group(ctx, observer, group, &mut report).await?;
            let config = group.chain.owner.path.clone();
            report
                .targets
                .extend(group.runs.drain(..).map(|run| run.into_report(config.clone())));
        }
        tracing::info!(summary = %report, "compile finished");
        Ok(report)
    }

    fn group(&self, observer: &dyn Observer, targets: &[PathBuf]) -> Result<Vec<Group>> {
        let mut locator = Locator::new();
        let mut groups: Vec<Group> = Vec::new();
        for target in targets {
            let target = std::path::absolute(target).map_err(|e| PipelineError::Io {
                path: target.clone(),
                source: e,
            })?;
            let chain = locator.resolve_owner(&target)?;
            let key = chain.owner.display_path().to_path_buf();
            let run = TargetRun::new(target);
            match groups.iter_mut().find(|g| g.key == key) {
                Some(group) => group.runs.push(run),
                None => {
                    if chain.is_implicit() {
                        tracing::info!(dir = %chain.owner.dir.display(), "no config found, using the system protoc");
                        observer.on_event(&Event::ImplicitConfig {
                            dir: chain.owner.dir.clone(),
                        });
                    }
                    groups.push(Group {
                        key,
                        chain,
                        runs: vec![run],
                    });
                }
            }
        }
        Ok(groups)
    }

    /// Move a group to `Planned`, or fail all of its targets.
    fn plan_group(&self, observer: &dyn Observer, group: &mut Group) -> Result<Option<BuildPlan>> {
        let items = group.chain.effective_items();
        if let Some(floating) = items.iter().find(|item| !item.is_pinned()) {
            let reason = missing(floating);
            for run in &mut group.runs {
                run.advance(observer, TargetState::NotTidied)?;
                run.fail(observer, reason.clone())?;
            }
            return Ok(None);
        }

        for run in &mut group.runs {
            run.advance(observer, TargetState::Tidied)?;
        }
        match BuildPlan::resolve(self.store, &group.chain, self.system_protoc.as_deref()) {
            Ok(plan) => {
                tracing::debug!(
                    config = %group.key.display(),
                    protoc = %plan.protoc.display(),
                    targets = group.runs.len(),
                    "planned group"
                );
                for run in &mut group.runs {
                    run.advance(observer, TargetState::Planned)?;
                }
                Ok(Some(plan))
            }
            Err(PipelineError::MissingTool {
                kind,
                name,
                version,
            }) => {
                let reason = FailureReason::MissingTool {
                    kind,
                    name,
                    version,
                };
                for run in &mut group.runs {
                    run.fail(observer, reason.clone())?;
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn finish_group(
        &self,
        ctx: &ExecContext,
        observer: &dyn Observer,
        group: &mut Group,
        report: &mut BuildReport,
    ) -> Result<()> {
        let config = Arc::clone(&group.chain.owner);
        let all_compiled = group
            .runs
            .iter()
            .all(|run| run.state == TargetState::Compiled);
        let run_actions =
            ctx.post_actions && !ctx.dry_run && all_compiled && !config.post_actions.is_empty();

        let compiled = group
            .runs
            .iter_mut()
            .filter(|run| run.state == TargetState::Compiled);
        if !run_actions {
            for run in compiled {
                run.advance(observer, TargetState::PostActionsSkipped)?;
                run.advance(observer, TargetState::Done)?;
            }
            return Ok(());
        }

        let mut runs: Vec<&mut TargetRun> = compiled.collect();
        for run in runs.iter_mut() {
            run.advance(observer, TargetState::PostActionsRun)?;
        }
        match run_post_actions(ctx, observer, &config).await {
            Ok(_) => {
                for run in runs {
                    run.advance(observer, TargetState::Done)?;
                }
            }
            Err(failure) => {
                let reason = FailureReason::PostAction {
                    action: failure.action.clone(),
                    error: failure.error.clone(),
                };
                for run in runs {
                    run.fail(observer, reason.clone())?;
                }
                report.post_action_failures.push(failure);
            }
        }
        Ok(())
    }
}

/// Targets sharing an owning config.
struct Group {
    key: PathBuf,
    chain: ConfigChain,
    runs: Vec<TargetRun>,
}

struct TargetRun {
    target: PathBuf,
    state: TargetState,
    compiled: bool,
    failure: Option<FailureReason>,
}

impl TargetRun {
    fn new(target: PathBuf) -> Self {
        TargetRun {
            target,
            state: TargetState::Pending,
            compiled: false,
            failure: None,
        }
    }

    fn advance(&mut self, observer: &dyn Observer, next: TargetState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                target: self.target.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        observer.on_event(&Event::TargetState {
            target: self.target.clone(),
            state: next,
        });
        Ok(())
    }

    fn fail(&mut self, observer: &dyn Observer, reason: FailureReason) -> Result<()> {
        self.advance(observer, TargetState::Failed)?;
        observer.on_event(&Event::TargetFailed {
            target: self.target.clone(),
            diagnostics: reason.to_string(),
        });
        self.failure = Some(reason);
        Ok(())
    }

    fn into_report(self, config: Option<PathBuf>) -> TargetReport {
        let failure = self.failure.map(|reason| TargetFailure {
            target: self.target.clone(),
            reason,
        });
        TargetReport {
            target: self.target,
            config,
            state: self.state,
            compiled: self.compiled,
            failure,
        }
    }
}

fn missing(item: &ConfigItem) -> FailureReason {
    FailureReason::MissingTool {
        kind: item.kind(),
        name: item.name().to_string(),
        version: item.specifier.clone(),
    }
}

async fn run_target(
    ctx: &ExecContext,
    observer: &dyn Observer,
    plan: &BuildPlan,
    target: &Path,
) -> std::result::Result<(), FailureReason> {
    let args = plan.args_for(target);
    observer.on_event(&Event::CommandPlanned {
        program: plan.protoc.clone(),
        args: args.clone(),
        cwd: plan.work_dir.clone(),
        dry_run: ctx.dry_run,
    });
    if ctx.dry_run {
        return Ok(());
    }

    let invocation = tokio::process::Command::new(&plan.protoc)
        .args(&args)
        .current_dir(&plan.work_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = match ctx.bounded(invocation).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(FailureReason::Compiler {
                diagnostics: format!("failed to start {}: {e}", plan.protoc.display()),
            })
        }
        Err(CoreError::Timeout { timeout }) => return Err(FailureReason::Timeout { timeout }),
        Err(other) => {
            return Err(FailureReason::Compiler {
                diagnostics: other.to_string(),
            })
        }
    };

    if output.status.success() {
        return Ok(());
    }
    let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
    diagnostics.push_str(&String::from_utf8_lossy(&output.stdout));
    if diagnostics.trim().is_empty() {
        diagnostics = format!("protoc exited with {}", output.status);
    }
    Err(FailureReason::Compiler { diagnostics })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::{fake_protoc, write, FakeSource};
    use crate::tidy::tidy_config;
    use protopin_core::{MemoryObserver, NullObserver, ToolKind};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn store(root: &Path, source: Arc<FakeSource>) -> ToolchainStore {
        ToolchainStore::new(root, source)
    }

    fn states_of(observer: &MemoryObserver, target: &Path) -> Vec<TargetState> {
        observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::TargetState { target: t, state } if t == target => Some(state),
                _ => None,
            })
            .collect()
    }

    const PINNED_PROTOC: &str = r#"[[tool]]
kind = "protoc"
version = "latest"

[compile]
options = ["--fake_out=gen"]
"#;

    #[tokio::test]
    async fn scenario_no_config_uses_the_system_protoc() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let a = write(work.path(), "a.proto", "syntax = \"proto3\";\n");
        let b = write(work.path(), "b.proto", "syntax = \"proto3\";\n");
        let store = store(cache.path(), Arc::new(FakeSource::new()));
        let observer = MemoryObserver::new();

        let report = Compiler::new(&store)
            .with_system_protoc(Some(fake_protoc()))
            .compile(&ExecContext::default(), &observer, &[a, b])
            .await
            .unwrap()
            .into_result()
            .unwrap();

        assert_eq!(report.to_string(), "2 files compiled");
        assert!(report.targets.iter().all(|t| t.config.is_none()));
        assert!(work.path().join("a.pb").is_file());
        assert!(work.path().join("b.pb").is_file());
        assert_eq!(
            observer.count(|e| matches!(e, Event::ImplicitConfig { .. })),
            1
        );
    }

    #[tokio::test]
    async fn tidy_then_compile() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(work.path(), "protopin.toml", PINNED_PROTOC);
        let target = write(work.path(), "api/a.proto", "syntax = \"proto3\";\n");
        let store = store(cache.path(), Arc::new(FakeSource::new()));
        let ctx = ExecContext::default();
        let targets = vec![target.clone()];

        tidy_config(&ctx, &store, &NullObserver, &targets)
            .await
            .unwrap();
        let observer = MemoryObserver::new();
        let report = Compiler::new(&store)
            .compile(&ctx, &observer, &targets)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        assert_eq!(report.compiled(), 1);
        assert!(work.path().join("gen/a.pb").is_file());
        assert_eq!(
            states_of(&observer, &target),
            vec![
                TargetState::Tidied,
                TargetState::Planned,
                TargetState::Compiled,
                TargetState::PostActionsSkipped,
                TargetState::Done,
            ]
        );
        let planned: Vec<Event> = observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::CommandPlanned { .. }))
            .collect();
        let Event::CommandPlanned { program, cwd, .. } = &planned[0] else {
            unreachable!()
        };
        assert_eq!(program, &cache.path().join("protoc/protoc/3.19.4/bin/protoc"));
        assert_eq!(cwd, &work.path().to_path_buf());
    }

    #[tokio::test]
    async fn untidied_config_fails_with_missing_tool() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(work.path(), "protopin.toml", PINNED_PROTOC);
        let target = write(work.path(), "a.proto", "");
        let source = Arc::new(FakeSource::new());
        let store = store(cache.path(), source.clone());
        let observer = MemoryObserver::new();

        let report = Compiler::new(&store)
            .with_system_protoc(Some(fake_protoc()))
            .compile(&ExecContext::default(), &observer, &[target.clone()])
            .await
            .unwrap();
        assert_eq!(
            states_of(&observer, &target),
            vec![TargetState::NotTidied, TargetState::Failed]
        );
        assert_eq!(observer.count(|e| matches!(e, Event::CommandPlanned { .. })), 0);
        assert_eq!(source.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);

        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingTool { kind: ToolKind::Protoc, ref version, .. } if version == "latest"
        ));
    }

    #[tokio::test]
    async fn failing_targets_do_not_stop_the_others() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let targets = vec![
            write(work.path(), "a.proto", "syntax = \"proto3\";\n"),
            write(work.path(), "b.proto", "BROKEN\n"),
            write(work.path(), "c.proto", "syntax = \"proto3\";\n"),
        ];
        let store = store(cache.path(), Arc::new(FakeSource::new()));

        let report = Compiler::new(&store)
            .with_system_protoc(Some(fake_protoc()))
            .compile(
                &ExecContext::default().with_concurrency(2),
                &NullObserver,
                &targets,
            )
            .await
            .unwrap();

        assert_eq!(report.compiled(), 2);
        let failures: Vec<&TargetFailure> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].target, targets[1]);
        assert!(failures[0].reason.to_string().contains("syntax error"));
        assert!(work.path().join("c.pb").is_file());
        assert!(matches!(
            report.into_result(),
            Err(PipelineError::Compile {
                failed: 1,
                total: 3
            })
        ));
    }

    #[tokio::test]
    async fn dry_run_reports_without_running() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let target = write(work.path(), "a.proto", "syntax = \"proto3\";\n");
        let store = store(cache.path(), Arc::new(FakeSource::new()));
        let observer = MemoryObserver::new();

        let report = Compiler::new(&store)
            .with_system_protoc(Some(fake_protoc()))
            .compile(
                &ExecContext::default().with_dry_run(true).with_post_actions(true),
                &observer,
                &[target],
            )
            .await
            .unwrap();

        assert_eq!(report.to_string(), "1 file planned (dry run)");
        assert!(!work.path().join("a.pb").exists());
        assert_eq!(
            observer.count(|e| matches!(e, Event::CommandPlanned { dry_run: true, .. })),
            1
        );
    }

    #[tokio::test]
    async fn scenario_post_action_failure_keeps_outputs() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(
            work.path(),
            "protopin.toml",
            r#"[compile]
options = ["--fake_out=gen"]

[[post_action]]
kind = "shell"
script = "exit 3"

[[post_action]]
kind = "shell"
script = "touch never"
"#,
        );
        let targets = vec![
            write(work.path(), "a.proto", "syntax = \"proto3\";\n"),
            write(work.path(), "b.proto", "syntax = \"proto3\";\n"),
        ];
        let store = store(cache.path(), Arc::new(FakeSource::new()));
        let observer = MemoryObserver::new();

        let report = Compiler::new(&store)
            .with_system_protoc(Some(fake_protoc()))
            .compile(
                &ExecContext::default().with_post_actions(true),
                &observer,
                &targets,
            )
            .await
            .unwrap();

        assert_eq!(report.compiled(), 2);
        assert_eq!(report.post_action_failures.len(), 1);
        assert!(work.path().join("gen/a.pb").is_file());
        assert!(work.path().join("gen/b.pb").is_file());
        assert!(!work.path().join("never").exists());
        assert_eq!(
            states_of(&observer, &targets[0]).last(),
            Some(&TargetState::Failed)
        );
        assert!(matches!(
            report.into_result(),
            Err(PipelineError::PostAction { failures: 1 })
        ));
    }

    #[tokio::test]
    async fn post_actions_need_every_target_compiled() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(
            work.path(),
            "protopin.toml",
            r#"[compile]
options = ["--fake_out=gen"]

[[post_action]]
kind = "shell"
script = "touch ran"
"#,
        );
        let targets = vec![
            write(work.path(), "a.proto", "syntax = \"proto3\";\n"),
            write(work.path(), "b.proto", "BROKEN\n"),
        ];
        let store = store(cache.path(), Arc::new(FakeSource::new()));
        let observer = MemoryObserver::new();

        let report = Compiler::new(&store)
            .with_system_protoc(Some(fake_protoc()))
            .compile(
                &ExecContext::default().with_post_actions(true),
                &observer,
                &targets,
            )
            .await
            .unwrap();

        assert!(!work.path().join("ran").exists());
        assert_eq!(
            states_of(&observer, &targets[0]),
            vec![
                TargetState::Tidied,
                TargetState::Planned,
                TargetState::Compiled,
                TargetState::PostActionsSkipped,
                TargetState::Done,
            ]
        );
        assert!(report.post_action_failures.is_empty());
    }

    #[tokio::test]
    async fn nearer_config_tools_are_used() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write(
            work.path(),
            "protopin.toml",
            "[[tool]]\nkind = \"protoc\"\nversion = \"3.18.0\"\n",
        );
        write(
            work.path(),
            "api/protopin.toml",
            "[[tool]]\nkind = \"protoc\"\nversion = \"3.19.4\"\n",
        );
        let target = write(work.path(), "api/a.proto", "syntax = \"proto3\";\n");
        let store = store(cache.path(), Arc::new(FakeSource::new()));
        let ctx = ExecContext::default();
        let targets = vec![target];

        tidy_config(&ctx, &store, &NullObserver, &targets)
            .await
            .unwrap();
        let observer = MemoryObserver::new();
        Compiler::new(&store)
            .compile(&ctx.clone().with_dry_run(true), &observer, &targets)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        let programs: Vec<PathBuf> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::CommandPlanned { program, .. } => Some(program),
                _ => None,
            })
            .collect();
        assert_eq!(
            programs,
            vec![cache.path().join("protoc/protoc/3.19.4/bin/protoc")]
        );
        assert!(!cache.path().join("protoc/protoc/3.18.0").exists());
    }

    #[tokio::test]
    async fn deadline_fails_running_targets() {
        let work = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let slow = write(work.path(), "bin/protoc", "#!/bin/sh\nsleep 10\n");
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&slow, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let target = write(work.path(), "a.proto", "");
        let store = store(cache.path(), Arc::new(FakeSource::new()));

        let report = Compiler::new(&store)
            .with_system_protoc(Some(slow))
            .compile(
                &ExecContext::new(Duration::from_millis(200)),
                &NullObserver,
                &[target],
            )
            .await
            .unwrap();
        assert!(report.into_result().unwrap_err().is_timeout());
    }
}
