//! Offline mirror on the local filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use protopin_core::ToolRef;

use super::ToolchainSource;
use crate::error::{Result, StoreError};

/// Serves every kind from a directory laid out like the cache itself:
///
/// ```text
/// <root>/<kind>/<name>/<version>/...
/// ```
///
/// Each version directory is copied verbatim into the cache.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalMirror { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tool_dir(&self, tool: &ToolRef) -> PathBuf {
        self.root.join(tool.kind.as_str()).join(&tool.name)
    }
}

#[async_trait]
impl ToolchainSource for LocalMirror {
    async fn list_versions(&self, tool: &ToolRef) -> Result<Vec<String>> {
        let dir = self.tool_dir(tool);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    versions.push(name.to_string());
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    async fn fetch(&self, tool: &ToolRef, version: &str, dest: &Path) -> Result<()> {
        let src = self.tool_dir(tool).join(version);
        if !src.is_dir() {
            return Err(StoreError::Unsupported {
                detail: format!("{tool}@{version} is not in the mirror at {}", self.root.display()),
            });
        }
        copy_tree(&src, dest)
    }
}

/// Copy a directory tree, preserving permissions.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            StoreError::io(path, e.into())
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let out = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| StoreError::io(&out, e))?;
        } else {
            std::fs::copy(entry.path(), &out).map_err(|e| StoreError::io(&out, e))?;
        }
    }
    Ok(())
}
