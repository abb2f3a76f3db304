//! Version pinning and toolchain installation.
//!
//! Tidy is the only stage that talks to version sources. It resolves every
//! floating specifier of a config to an exact version, writes the pins back
//! into the file, and installs what the file now declares. Compile never
//! resolves or installs anything, so a build is reproducible from the files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures::future::try_join_all;

use protopin_config::{load_config, ConfigItem, Locator, Pin};
use protopin_core::{Event, ExecContext, InstallRequest, Observer, ToolKind};
use protopin_store::{ContentHash, StoreError, ToolchainStore};

use crate::error::{PipelineError, Result};

/// What tidying one config file did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TidyOutcome {
    pub path: PathBuf,
    /// Pins computed for the file's floating items.
    pub pins: Vec<Pin>,
    /// Whether the file was rewritten.
    pub rewritten: bool,
}

/// Pin every floating item of the config at `path`.
///
/// Lookups run concurrently. The file is written once, after every lookup
/// has finished, while holding a lock on the config path; on timeout it is
/// left byte-identical.
pub async fn tidy_config_file(
    ctx: &ExecContext,
    store: &ToolchainStore,
    observer: &dyn Observer,
    path: &Path,
) -> Result<TidyOutcome> {
    observer.on_event(&Event::TidyStarted {
        config: path.to_path_buf(),
    });
    let config = load_config(path)?;
    let floating: Vec<&ConfigItem> = config.items.iter().filter(|i| !i.is_pinned()).collect();

    if floating.is_empty() {
        observer.on_event(&Event::ConfigUnchanged {
            config: path.to_path_buf(),
        });
        return Ok(TidyOutcome {
            path: path.to_path_buf(),
            pins: Vec::new(),
            rewritten: false,
        });
    }

    let lookups = try_join_all(floating.iter().map(|item| resolve_pin(ctx, store, observer, item)));
    let pins = ctx
        .bounded(lookups)
        .await
        .map_err(|e| tidy_error(path, e.into()))?
        .map_err(|e| tidy_error(path, e))?;

    let _guard = store
        .lock_named(ctx, &config_lock_name(path))
        .await
        .map_err(|e| tidy_error(path, e))?;
    let rewritten = protopin_config::rewrite_versions(path, &pins)?;

    if rewritten {
        tracing::info!(config = %path.display(), pinned = pins.len(), "pinned versions");
        observer.on_event(&Event::ConfigRewritten {
            config: path.to_path_buf(),
            pinned: pins.len(),
        });
    } else {
        observer.on_event(&Event::ConfigUnchanged {
            config: path.to_path_buf(),
        });
    }
    Ok(TidyOutcome {
        path: path.to_path_buf(),
        pins,
        rewritten,
    })
}

/// Tidy the configs governing `targets`, then install what they declare.
///
/// Each distinct config file is tidied once even when many targets share it.
/// Installs follow the precedence of each target's chain, so an item
/// overridden by a nearer config is not installed for that target. Returns
/// the tidied config paths, nearest first per target.
pub async fn tidy_config(
    ctx: &ExecContext,
    store: &ToolchainStore,
    observer: &dyn Observer,
    targets: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let mut locator = Locator::new();
    let mut paths = Vec::new();
    let mut implicit_dirs = HashSet::new();
    for target in targets {
        let chain = locator.resolve_owner(target)?;
        if chain.is_implicit() {
            if implicit_dirs.insert(chain.owner.dir.clone()) {
                observer.on_event(&Event::ImplicitConfig {
                    dir: chain.owner.dir.clone(),
                });
            }
            continue;
        }
        for path in chain.config_paths() {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }

    tidy_files(ctx, store, observer, &paths).await?;

    // Fresh locator: the files were just rewritten.
    let mut locator = Locator::new();
    let mut requests = Vec::new();
    for target in targets {
        let chain = locator.resolve_owner(target)?;
        collect_requests(&chain.effective_items(), &mut requests);
    }
    install_requests(ctx, store, observer, &requests).await?;
    Ok(paths)
}

/// Tidy explicit config files and install everything each one declares.
pub async fn tidy_configs(
    ctx: &ExecContext,
    store: &ToolchainStore,
    observer: &dyn Observer,
    paths: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let mut distinct: Vec<PathBuf> = Vec::new();
    for path in paths {
        if !distinct.contains(path) {
            distinct.push(path.clone());
        }
    }
    tidy_files(ctx, store, observer, &distinct).await?;

    let mut requests = Vec::new();
    for path in &distinct {
        collect_requests(&load_config(path)?.items, &mut requests);
    }
    install_requests(ctx, store, observer, &requests).await?;
    Ok(distinct)
}

async fn tidy_files(
    ctx: &ExecContext,
    store: &ToolchainStore,
    observer: &dyn Observer,
    paths: &[PathBuf],
) -> Result<Vec<TidyOutcome>> {
    let total = paths.len();
    let outcomes = try_join_all(
        paths
            .iter()
            .map(|path| tidy_config_file(ctx, store, observer, path)),
    )
    .await?;
    observer.on_event(&Event::Progress {
        stage: "tidy",
        done: outcomes.len(),
        total,
    });
    Ok(outcomes)
}

async fn resolve_pin(
    ctx: &ExecContext,
    store: &ToolchainStore,
    observer: &dyn Observer,
    item: &ConfigItem,
) -> std::result::Result<Pin, StoreError> {
    let spec = item.spec()?;
    let version = store.resolve_version(ctx, &item.tool, &spec).await?;
    observer.on_event(&Event::VersionResolved {
        kind: item.kind(),
        name: item.name().to_string(),
        specifier: item.specifier.clone(),
        version: version.clone(),
    });
    Ok(Pin {
        kind: item.kind(),
        name: item.name().to_string(),
        from: item.specifier.clone(),
        version,
    })
}

fn tidy_error(path: &Path, err: StoreError) -> PipelineError {
    match err {
        StoreError::Timeout { timeout } => PipelineError::TidyTimeout {
            path: path.to_path_buf(),
            timeout,
        },
        other => other.into(),
    }
}

/// Lock name shared by every tidy of the file at `path`.
fn config_lock_name(path: &Path) -> String {
    let digest = ContentHash::compute(path.to_string_lossy().as_bytes());
    format!("config-{}.lock", digest.short())
}

fn collect_requests(items: &[ConfigItem], requests: &mut Vec<InstallRequest>) {
    for request in items.iter().filter_map(ConfigItem::install_request) {
        if !requests.contains(&request) {
            requests.push(request);
        }
    }
}

/// Install in dependency order: protoc, then repositories, then plugins.
async fn install_requests(
    ctx: &ExecContext,
    store: &ToolchainStore,
    observer: &dyn Observer,
    requests: &[InstallRequest],
) -> Result<()> {
    let of_kind = |kind: ToolKind| -> Vec<InstallRequest> {
        requests
            .iter()
            .filter(|r| r.tool.kind == kind)
            .cloned()
            .collect()
    };

    let mut done = 0;
    for kind in ToolKind::ALL {
        let batch = of_kind(kind);
        if batch.is_empty() {
            continue;
        }
        match kind {
            ToolKind::Protoc => store.install_protoc(ctx, observer, &batch).await?,
            ToolKind::Repository => store.install_repositories(ctx, observer, &batch).await?,
            ToolKind::Plugin => store.install_plugins(ctx, observer, &batch).await?,
        };
        done += batch.len();
        observer.on_event(&Event::Progress {
            stage: "install",
            done,
            total: requests.len(),
        });
    }
    Ok(())
}
