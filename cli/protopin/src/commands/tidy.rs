//! `protopin tidy`: pin versions and install toolchains.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use protopin_config::{list_config_paths, CONFIG_FILE_NAME};
use protopin_core::TracingObserver;
use protopin_pipeline::tidy_configs;

use crate::settings::Settings;

pub async fn run(settings: &Settings, cwd: &Path, configs: &[PathBuf]) -> Result<()> {
    let paths = config_paths(cwd, configs)?;
    if paths.is_empty() {
        if configs.is_empty() {
            println!("no {CONFIG_FILE_NAME} found from {} upward", cwd.display());
        } else {
            println!("no config to tidy");
        }
        return Ok(());
    }

    let ctx = settings.context();
    let store = settings.store()?;
    let tidied = tidy_configs(&ctx, &store, &TracingObserver, &paths).await?;
    for path in &tidied {
        println!("tidied {}", path.display());
    }
    Ok(())
}

/// Explicit configs (a directory means its `protopin.toml`), or the
/// ancestor chain of `cwd`. Explicit paths that do not exist are skipped.
pub(crate) fn config_paths(cwd: &Path, configs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if configs.is_empty() {
        return list_config_paths(cwd)
            .with_context(|| format!("looking for configs above {}", cwd.display()));
    }
    let mut paths = Vec::new();
    for path in configs {
        let path = cwd.join(path);
        let path = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path
        };
        if path.is_file() {
            paths.push(path);
        } else {
            tracing::warn!(config = %path.display(), "config not found, skipping");
        }
    }
    Ok(paths)
}
