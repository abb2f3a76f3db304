//! protoc plugins installed with `go install`.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use protopin_core::ToolRef;

use super::{run_tool, ToolchainSource};
use crate::error::{Result, StoreError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModuleVersions {
    #[serde(default)]
    versions: Vec<String>,
}

/// Lists versions through the Go module proxy and builds plugins with the
/// local Go toolchain. A plugin's `source` is its Go package path.
#[derive(Debug, Clone)]
pub struct GoPluginSource {
    go: String,
}

impl GoPluginSource {
    pub fn new() -> Self {
        GoPluginSource {
            go: "go".to_string(),
        }
    }

    /// Use a specific `go` binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        GoPluginSource {
            go: program.into(),
        }
    }

    fn package<'a>(&self, tool: &'a ToolRef) -> Result<&'a str> {
        tool.source
            .as_deref()
            .ok_or_else(|| StoreError::Unsupported {
                detail: format!("{tool} has no Go package `source`"),
            })
    }
}

impl Default for GoPluginSource {
    fn default() -> Self {
        GoPluginSource::new()
    }
}

#[async_trait]
impl ToolchainSource for GoPluginSource {
    async fn list_versions(&self, tool: &ToolRef) -> Result<Vec<String>> {
        let package = self.package(tool)?;
        // Outside any go.mod so the query is not influenced by a local module.
        let scratch = tempfile::tempdir().map_err(|e| StoreError::io(std::env::temp_dir(), e))?;

        // `go list -m` wants the module path; walk up from the package path
        // until a prefix is a module.
        let mut last_err = None;
        for module in module_candidates(package) {
            match run_tool(
                &self.go,
                &["list", "-m", "-versions", "-json", module],
                Some(scratch.path()),
                &[],
            )
            .await
            {
                Ok(stdout) => {
                    let parsed: ModuleVersions = serde_json::from_str(&stdout)?;
                    return Ok(parsed.versions);
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Unsupported {
            detail: format!("'{package}' is not a Go module path"),
        }))
    }

    async fn fetch(&self, tool: &ToolRef, version: &str, dest: &Path) -> Result<()> {
        let package = self.package(tool)?;
        let bin = dest.join("bin");
        std::fs::create_dir_all(&bin).map_err(|e| StoreError::io(&bin, e))?;

        let target = format!("{package}@{version}");
        run_tool(
            &self.go,
            &["install", &target],
            Some(dest),
            &[("GOBIN", bin.clone())],
        )
        .await?;

        // `go install` names the binary after the package's last element.
        let built = bin.join(exe(package.rsplit('/').next().unwrap_or(package)));
        let wanted = bin.join(exe(&tool.name));
        if built != wanted {
            std::fs::rename(&built, &wanted).map_err(|e| StoreError::io(&built, e))?;
        }
        if !wanted.is_file() {
            return Err(StoreError::Command {
                program: self.go.clone(),
                detail: format!("`go install {target}` did not produce {}", wanted.display()),
            });
        }
        Ok(())
    }
}

fn module_candidates(package: &str) -> impl Iterator<Item = &str> {
    let mut current = Some(package);
    std::iter::from_fn(move || {
        let out = current?;
        current = out.rsplit_once('/').map(|(head, _)| head).filter(|h| h.contains('.'));
        Some(out)
    })
}

fn exe(name: &str) -> String {
    format!("{name}{}", std::env::consts::EXE_SUFFIX)
}
