//! Per-group compiler invocation plans.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use protopin_config::{Config, ConfigChain, ConfigItem};
use protopin_core::ToolKind;
use protopin_store::{StoreError, ToolchainStore};

use crate::error::{PipelineError, Result};

/// Everything needed to run protoc for one group of targets.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// The owning config of every target in the group.
    pub config: Arc<Config>,
    pub protoc: PathBuf,
    /// `--proto_path` directories in search order.
    pub include_paths: Vec<PathBuf>,
    /// `(plugin name, binary)` pairs.
    pub plugins: Vec<(String, PathBuf)>,
    pub options: Vec<String>,
    pub work_dir: PathBuf,
}

impl BuildPlan {
    /// Resolve every tool of `chain` through the store.
    ///
    /// Nothing is resolved or installed here: an unpinned item or a missing
    /// install is a [`PipelineError::MissingTool`].
    pub fn resolve(
        store: &ToolchainStore,
        chain: &ConfigChain,
        system_protoc: Option<&Path>,
    ) -> Result<BuildPlan> {
        let items = chain.effective_items();
        let config = Arc::clone(&chain.owner);

        let protoc = match items.iter().find(|i| i.kind() == ToolKind::Protoc) {
            Some(item) => locate(store, item)?,
            None => system_protoc
                .map(Path::to_path_buf)
                .ok_or_else(|| PipelineError::MissingTool {
                    kind: ToolKind::Protoc,
                    name: "protoc".to_string(),
                    version: "system".to_string(),
                })?,
        };

        let mut include_paths = Vec::new();
        for dir in &config.compile.import_paths {
            push_unique(&mut include_paths, dir.clone());
        }
        for item in items.iter().filter(|i| i.kind() == ToolKind::Repository) {
            let checkout = locate(store, item)?;
            let dir = match &item.include {
                Some(sub) => checkout.join(sub),
                None => checkout,
            };
            push_unique(&mut include_paths, dir);
        }
        if let Some(bundled) = bundled_include(&protoc) {
            push_unique(&mut include_paths, bundled);
        }

        let mut plugins = Vec::new();
        for item in items.iter().filter(|i| i.kind() == ToolKind::Plugin) {
            plugins.push((item.name().to_string(), locate(store, item)?));
        }

        Ok(BuildPlan {
            protoc,
            include_paths,
            plugins,
            options: config.compile.options.clone(),
            work_dir: config.compile.work_dir.clone(),
            config,
        })
    }

    /// Arguments for compiling `target`.
    ///
    /// The target's own directory is searched last. Under the implicit
    /// config, where no generator options exist, a descriptor set is written
    /// next to the target so the invocation has an output.
    pub fn args_for(&self, target: &Path) -> Vec<String> {
        let mut include_paths = self.include_paths.clone();
        if let Some(dir) = target.parent() {
            push_unique(&mut include_paths, dir.to_path_buf());
        }

        let mut args: Vec<String> = include_paths
            .iter()
            .map(|dir| format!("--proto_path={}", dir.display()))
            .collect();
        args.extend(
            self.plugins
                .iter()
                .map(|(name, path)| format!("--plugin={name}={}", path.display())),
        );
        args.extend(self.options.iter().cloned());
        if self.config.is_implicit() {
            args.push(format!(
                "--descriptor_set_out={}",
                target.with_extension("pb").display()
            ));
        }
        args.push(target.display().to_string());
        args
    }
}

fn locate(store: &ToolchainStore, item: &ConfigItem) -> Result<PathBuf> {
    let missing = || PipelineError::MissingTool {
        kind: item.kind(),
        name: item.name().to_string(),
        version: item.specifier.clone(),
    };
    let key = item.cache_key().ok_or_else(missing)?;
    match store.locate_binary(&key) {
        Ok(path) => Ok(path),
        Err(StoreError::NotFound { .. }) => Err(missing()),
        Err(e) => Err(e.into()),
    }
}

/// protoc release archives ship the well-known types next to `bin/`.
fn bundled_include(protoc: &Path) -> Option<PathBuf> {
    let include = protoc.parent()?.parent()?.join("include");
    include.join("google/protobuf").is_dir().then_some(include)
}

fn push_unique(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}
