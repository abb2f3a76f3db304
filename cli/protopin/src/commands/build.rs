//! `protopin build`: tidy, install, then compile.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use protopin_core::{ExecContext, Observer, TracingObserver};
use protopin_pipeline::{system_protoc, tidy_config, BuildReport, Compiler};
use protopin_store::ToolchainStore;

use crate::settings::Settings;

pub async fn run(
    settings: &Settings,
    path: &Path,
    recursive: bool,
    post_actions: bool,
    dry_run: bool,
) -> Result<()> {
    let targets = discover_targets(path, recursive)?;
    if targets.is_empty() {
        tracing::warn!(path = %path.display(), "no file to compile");
        return Ok(());
    }

    let ctx = settings
        .context()
        .with_dry_run(dry_run)
        .with_post_actions(post_actions);
    let store = settings.store()?;
    let report = build(&ctx, &store, &TracingObserver, &targets, system_protoc()).await?;
    println!("succeed! {report}");
    Ok(())
}

/// Tidy the configs governing `targets`, then compile them.
pub(crate) async fn build(
    ctx: &ExecContext,
    store: &ToolchainStore,
    observer: &dyn Observer,
    targets: &[PathBuf],
    system_protoc: Option<PathBuf>,
) -> Result<BuildReport> {
    tidy_config(ctx, store, observer, targets)
        .await
        .context("tidying configs")?;

    let report = Compiler::new(store)
        .with_system_protoc(system_protoc)
        .compile(ctx, observer, targets)
        .await?;
    if !report.is_success() {
        eprintln!("{report}");
    }
    Ok(report.into_result()?)
}

/// `.proto` files at `path`: the file itself, the directory's direct
/// children, or its whole tree when `recursive`.
pub(crate) fn discover_targets(path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("{} does not exist", path.display());
    }

    let walker = WalkDir::new(path).sort_by_file_name();
    let walker = if recursive {
        walker
    } else {
        walker.max_depth(1)
    };
    let mut targets = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", path.display()))?;
        let is_proto = entry.path().extension().is_some_and(|ext| ext == "proto");
        if entry.file_type().is_file() && is_proto {
            targets.push(entry.into_path());
        }
    }
    Ok(targets)
}
