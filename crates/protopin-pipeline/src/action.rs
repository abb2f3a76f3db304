//! Post-actions run after a group compiles.

use std::path::Path;
use std::process::Stdio;

use protopin_config::{Config, PostAction};
use protopin_core::{Event, ExecContext, Observer};

use crate::report::PostActionFailure;

/// Run `config`'s post-actions in order, stopping at the first failure.
///
/// Actions only touch what they name; compiled output is never cleaned up on
/// failure.
pub async fn run_post_actions(
    ctx: &ExecContext,
    observer: &dyn Observer,
    config: &Config,
) -> Result<usize, PostActionFailure> {
    let config_path = config.display_path().to_path_buf();
    for (ran, action) in config.post_actions.iter().enumerate() {
        observer.on_event(&Event::PostActionStarted {
            config: config_path.clone(),
            action: action.to_string(),
        });
        tracing::debug!(config = %config_path.display(), %action, "running post-action");

        let outcome = match ctx.bounded(run_action(action, &config.dir)).await {
            Ok(result) => result,
            Err(timeout) => Err(timeout.to_string()),
        };
        if let Err(error) = outcome {
            observer.on_event(&Event::PostActionFailed {
                config: config_path.clone(),
                action: action.to_string(),
                error: error.clone(),
            });
            let skipped = config.post_actions.len() - ran - 1;
            if skipped > 0 {
                tracing::warn!(config = %config_path.display(), skipped, "skipping remaining post-actions");
            }
            return Err(PostActionFailure {
                config: config_path,
                action: action.to_string(),
                error,
            });
        }
    }
    Ok(config.post_actions.len())
}

async fn run_action(action: &PostAction, dir: &Path) -> Result<(), String> {
    match action {
        PostAction::Command { args } => {
            let (program, rest) = args
                .split_first()
                .ok_or_else(|| "empty command".to_string())?;
            run_process(program, rest, dir).await
        }
        PostAction::Shell { script } => {
            #[cfg(windows)]
            let (shell, flag) = ("cmd", "/C");
            #[cfg(not(windows))]
            let (shell, flag) = ("sh", "-c");
            run_process(shell, &[flag.to_string(), script.clone()], dir).await
        }
        PostAction::Copy { from, to } => {
            ensure_parent(to)?;
            tokio::fs::copy(from, to)
                .await
                .map(|_| ())
                .map_err(|e| format!("copying {}: {e}", from.display()))
        }
        PostAction::Move { from, to } => {
            ensure_parent(to)?;
            tokio::fs::rename(from, to)
                .await
                .map_err(|e| format!("moving {}: {e}", from.display()))
        }
        PostAction::Remove { path } => {
            let removed = if path.is_dir() {
                tokio::fs::remove_dir_all(path).await
            } else {
                tokio::fs::remove_file(path).await
            };
            match removed {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(format!("removing {}: {e}", path.display())),
            }
        }
    }
}

async fn run_process(program: &str, args: &[String], dir: &Path) -> Result<(), String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("failed to start `{program}`: {e}"))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    if detail.is_empty() {
        Err(output.status.to_string())
    } else {
        Err(format!("{}: {detail}", output.status))
    }
}

fn ensure_parent(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent)
            .map_err(|e| format!("creating {}: {e}", parent.display())),
        None => Ok(()),
    }
}
