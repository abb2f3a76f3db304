//! Tool settings shared by every command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use protopin_core::ExecContext;
use protopin_store::{DefaultSource, LocalMirror, ToolchainSource, ToolchainStore};

/// Global flags, with their environment fallbacks already applied by clap.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_dir: Option<PathBuf>,
    pub mirror: Option<PathBuf>,
    pub debug: bool,
    pub timeout: Duration,
}

impl Settings {
    pub fn cache_root(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => ToolchainStore::default_root()
                .context("cannot determine the home directory; pass --cache-dir"),
        }
    }

    /// The store, fetching from the mirror when one is configured.
    pub fn store(&self) -> Result<ToolchainStore> {
        let source: Arc<dyn ToolchainSource> = match &self.mirror {
            Some(root) => {
                tracing::debug!(mirror = %root.display(), "using local mirror");
                Arc::new(LocalMirror::new(root))
            }
            None => Arc::new(DefaultSource::new()),
        };
        Ok(ToolchainStore::new(self.cache_root()?, source))
    }

    /// A fresh context; its deadline starts now.
    pub fn context(&self) -> ExecContext {
        ExecContext::new(self.timeout).with_debug(self.debug)
    }
}

/// Parse `500ms`, `300s`, `5m`, `1h`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{raw}' (expected e.g. 300s, 5m, 500ms)"))?;
    match unit.trim() {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        other => Err(format!("unknown duration unit '{other}' in '{raw}'")),
    }
}
