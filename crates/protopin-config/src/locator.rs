//! Upward config discovery and owning-config resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protopin_core::ToolKind;

use crate::error::Result;
use crate::loader::{absolute, load_config};
use crate::types::{Config, ConfigItem, CONFIG_FILE_NAME};

/// Config file paths from `start_dir` up to the filesystem root, nearest
/// first, stopping after a file marked `root = true`.
pub fn list_config_paths(start_dir: &Path) -> Result<Vec<PathBuf>> {
    let chain = Locator::new().chain_for_dir(start_dir)?;
    Ok(chain
        .iter()
        .filter_map(|config| config.path.clone())
        .collect())
}

/// Resolve the owning config of one target.
pub fn resolve_owner(target: &Path) -> Result<ConfigChain> {
    Locator::new().resolve_owner(target)
}

/// The configs governing one target.
#[derive(Debug, Clone)]
pub struct ConfigChain {
    /// Nearest governing config, or the implicit one.
    pub owner: Arc<Config>,
    /// Every governing config, nearest first. Empty when the owner is implicit.
    pub chain: Vec<Arc<Config>>,
}

impl ConfigChain {
    pub fn is_implicit(&self) -> bool {
        self.owner.is_implicit()
    }

    /// Declared items with precedence applied: for each `(kind, name)` the
    /// nearest declaration wins. Nearer items come first.
    pub fn effective_items(&self) -> Vec<ConfigItem> {
        let mut seen: Vec<(ToolKind, &str)> = Vec::new();
        let mut items = Vec::new();
        for config in &self.chain {
            for item in &config.items {
                let id = (item.kind(), item.name());
                if !seen.contains(&id) {
                    seen.push(id);
                    items.push(item.clone());
                }
            }
        }
        items
    }

    /// Paths of the chain's files, nearest first.
    pub fn config_paths(&self) -> Vec<PathBuf> {
        self.chain
            .iter()
            .filter_map(|config| config.path.clone())
            .collect()
    }
}

/// Loads each config file at most once per invocation.
#[derive(Debug, Default)]
pub struct Locator {
    loaded: HashMap<PathBuf, Arc<Config>>,
}

impl Locator {
    pub fn new() -> Self {
        Locator::default()
    }

    /// Every config from `start_dir` upward, nearest first, ending at the
    /// first root marker.
    pub fn chain_for_dir(&mut self, start_dir: &Path) -> Result<Vec<Arc<Config>>> {
        let mut dir = absolute(start_dir)?;
        let mut chain = Vec::new();
        loop {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                let config = self.load(&candidate)?;
                let stop = config.root;
                chain.push(config);
                if stop {
                    break;
                }
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(chain)
    }

    /// Owner and governing chain for a target file or directory.
    pub fn resolve_owner(&mut self, target: &Path) -> Result<ConfigChain> {
        let target = absolute(target)?;
        let start = if target.is_dir() {
            target.clone()
        } else {
            target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| target.clone())
        };

        let chain: Vec<Arc<Config>> = self
            .chain_for_dir(&start)?
            .into_iter()
            .filter(|config| config.governs(&target))
            .collect();

        let owner = match chain.first() {
            Some(owner) => Arc::clone(owner),
            None => {
                tracing::debug!(target = %target.display(), "no config governs target");
                Arc::new(Config::implicit(&start))
            }
        };
        Ok(ConfigChain { owner, chain })
    }

    fn load(&mut self, path: &Path) -> Result<Arc<Config>> {
        if let Some(config) = self.loaded.get(path) {
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(load_config(path)?);
        self.loaded.insert(path.to_path_buf(), Arc::clone(&config));
        Ok(config)
    }
}
