//! Structured events and the observer capability that receives them.
//!
//! Pipeline code never prints. It reports what it is doing to an injected
//! [`Observer`]; the CLI plugs in [`TracingObserver`], tests plug in
//! [`MemoryObserver`].

use std::path::PathBuf;

use parking_lot::Mutex;

use crate::kind::{CacheKey, ToolKind};
use crate::state::TargetState;

/// Something the pipeline did or is about to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A config file is about to be tidied.
    TidyStarted { config: PathBuf },
    /// A floating specifier was resolved to an exact version.
    VersionResolved {
        kind: ToolKind,
        name: String,
        specifier: String,
        version: String,
    },
    /// Tidy wrote pinned versions back to the file.
    ConfigRewritten { config: PathBuf, pinned: usize },
    /// Tidy found nothing to pin.
    ConfigUnchanged { config: PathBuf },
    /// No config governs a directory; the implicit config is used.
    ImplicitConfig { dir: PathBuf },
    /// The entry is already installed and verified.
    InstallSkipped { key: CacheKey, path: PathBuf },
    /// Another caller holds the key lock.
    InstallWaiting { key: CacheKey },
    /// A fetch is starting.
    InstallStarted { key: CacheKey },
    /// A transient failure is being retried.
    InstallRetry {
        key: CacheKey,
        attempt: u32,
        error: String,
    },
    /// A corrupted entry was discarded before re-fetching.
    CorruptEntryRemoved { key: CacheKey, path: PathBuf },
    /// The entry was fetched, verified, and published.
    Installed {
        key: CacheKey,
        path: PathBuf,
        digest: String,
    },
    /// A compile target moved to a new state.
    TargetState { target: PathBuf, state: TargetState },
    /// A compiler invocation was planned (and not run, under dry-run).
    CommandPlanned {
        program: PathBuf,
        args: Vec<String>,
        cwd: PathBuf,
        dry_run: bool,
    },
    /// A compile target failed, with captured diagnostics.
    TargetFailed { target: PathBuf, diagnostics: String },
    /// A post-action is starting.
    PostActionStarted { config: PathBuf, action: String },
    /// A post-action failed.
    PostActionFailed {
        config: PathBuf,
        action: String,
        error: String,
    },
    /// Coarse progress for a stage.
    Progress {
        stage: &'static str,
        done: usize,
        total: usize,
    },
}

/// Receives pipeline events. Implementations must be cheap and non-blocking.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&self, _event: &Event) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::TidyStarted { config } => {
                tracing::info!(config = %config.display(), "tidy config");
            }
            Event::VersionResolved {
                kind,
                name,
                specifier,
                version,
            } => {
                tracing::info!(%kind, %name, %specifier, %version, "resolved version");
            }
            Event::ConfigRewritten { config, pinned } => {
                tracing::info!(config = %config.display(), pinned, "pinned versions written");
            }
            Event::ConfigUnchanged { config } => {
                tracing::debug!(config = %config.display(), "config already pinned");
            }
            Event::ImplicitConfig { dir } => {
                tracing::warn!(
                    dir = %dir.display(),
                    "no protopin.toml governs this directory, using the system protoc"
                );
            }
            Event::InstallSkipped { key, path } => {
                tracing::debug!(%key, path = %path.display(), "already installed");
            }
            Event::InstallWaiting { key } => {
                tracing::info!(%key, "waiting for another installer");
            }
            Event::InstallStarted { key } => {
                tracing::info!(%key, "installing");
            }
            Event::InstallRetry {
                key,
                attempt,
                error,
            } => {
                tracing::warn!(%key, attempt, %error, "retrying fetch");
            }
            Event::CorruptEntryRemoved { key, path } => {
                tracing::warn!(%key, path = %path.display(), "removed corrupted cache entry");
            }
            Event::Installed { key, path, digest } => {
                tracing::info!(%key, path = %path.display(), %digest, "installed");
            }
            Event::TargetState { target, state } => {
                tracing::debug!(target = %target.display(), %state, "target state");
            }
            Event::CommandPlanned {
                program,
                args,
                cwd,
                dry_run,
            } => {
                let line = format!("{} {}", program.display(), args.join(" "));
                if *dry_run {
                    tracing::info!(cwd = %cwd.display(), "dry-run: {line}");
                } else {
                    tracing::debug!(cwd = %cwd.display(), "exec: {line}");
                }
            }
            Event::TargetFailed {
                target,
                diagnostics,
            } => {
                tracing::error!(target = %target.display(), "compile failed:\n{diagnostics}");
            }
            Event::PostActionStarted { config, action } => {
                tracing::info!(config = %config.display(), %action, "post-action");
            }
            Event::PostActionFailed {
                config,
                action,
                error,
            } => {
                tracing::error!(config = %config.display(), %action, %error, "post-action failed");
            }
            Event::Progress { stage, done, total } => {
                tracing::debug!(stage, done, total, "progress");
            }
        }
    }
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<Event>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        MemoryObserver::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl Observer for MemoryObserver {
    fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_observer_records_in_order() {
        let observer = MemoryObserver::new();
        observer.on_event(&Event::TidyStarted {
            config: PathBuf::from("/a/protopin.toml"),
        });
        observer.on_event(&Event::ConfigUnchanged {
            config: PathBuf::from("/a/protopin.toml"),
        });

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::TidyStarted { .. }));
        assert_eq!(
            observer.count(|e| matches!(e, Event::ConfigUnchanged { .. })),
            1
        );
    }

    #[test]
    fn observers_are_object_safe() {
        let observers: Vec<Box<dyn Observer>> = vec![
            Box::new(NullObserver),
            Box::new(TracingObserver),
            Box::new(MemoryObserver::new()),
        ];
        for observer in &observers {
            observer.on_event(&Event::Progress {
                stage: "tidy",
                done: 1,
                total: 2,
            });
        }
    }
}
