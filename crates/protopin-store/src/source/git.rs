//! Schema repositories fetched with `git`.

use std::path::Path;

use async_trait::async_trait;

use protopin_core::version::is_commit_hash;
use protopin_core::{ToolRef, VersionSpec};

use super::{describe, run_tool, ToolchainSource};
use crate::error::{Result, StoreError};

/// Pins branches and tags to commits with `git ls-remote` and checks out one
/// commit per cache entry. A repository's `source` is its clone URL.
#[derive(Debug, Clone)]
pub struct GitRepositorySource {
    git: String,
}

impl GitRepositorySource {
    pub fn new() -> Self {
        GitRepositorySource {
            git: "git".to_string(),
        }
    }

    fn url<'a>(&self, tool: &'a ToolRef) -> Result<&'a str> {
        tool.source
            .as_deref()
            .ok_or_else(|| StoreError::Unsupported {
                detail: format!("{tool} has no git `source`"),
            })
    }

    async fn ls_remote(&self, url: &str, patterns: &[&str]) -> Result<Vec<RemoteRef>> {
        let mut args = vec!["ls-remote", url];
        args.extend_from_slice(patterns);
        let stdout = run_tool(&self.git, &args, None, &[]).await?;
        Ok(parse_ls_remote(&stdout))
    }

    async fn git_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        run_tool(&self.git, args, Some(dir), &[]).await
    }
}

impl Default for GitRepositorySource {
    fn default() -> Self {
        GitRepositorySource::new()
    }
}

#[async_trait]
impl ToolchainSource for GitRepositorySource {
    /// Tag names.
    async fn list_versions(&self, tool: &ToolRef) -> Result<Vec<String>> {
        let url = self.url(tool)?;
        let refs = self.ls_remote(url, &["--tags"]).await?;
        let mut tags: Vec<String> = refs
            .iter()
            .filter_map(|r| r.name.strip_prefix("refs/tags/"))
            .map(|t| t.trim_end_matches("^{}").to_string())
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn resolve(&self, tool: &ToolRef, spec: &VersionSpec) -> Result<String> {
        let url = self.url(tool)?;
        let refs = match spec {
            VersionSpec::Exact(commit) => return Ok(commit.clone()),
            VersionSpec::Latest => self.ls_remote(url, &["HEAD"]).await?,
            VersionSpec::Reference(name) => self.ls_remote(url, &[name.as_str()]).await?,
            VersionSpec::Requirement(_) => {
                return Err(StoreError::Unsupported {
                    detail: format!("{tool}: repositories are pinned by branch, tag, or commit"),
                })
            }
        };
        let reference = match spec {
            VersionSpec::Reference(name) => name.as_str(),
            _ => "HEAD",
        };
        pick_commit(&refs, reference).ok_or_else(|| StoreError::NoMatchingVersion {
            tool: tool.to_string(),
            spec: describe(spec),
        })
    }

    async fn fetch(&self, tool: &ToolRef, version: &str, dest: &Path) -> Result<()> {
        let url = self.url(tool)?;
        if !is_commit_hash(version) {
            return Err(StoreError::Unsupported {
                detail: format!("{tool}: expected a commit hash, got '{version}'"),
            });
        }

        self.git_in(dest, &["init", "--quiet"]).await?;
        let shallow = self
            .git_in(dest, &["fetch", "--quiet", "--depth", "1", url, version])
            .await;
        match shallow {
            Ok(_) => {}
            Err(e) if e.is_transient() => return Err(e),
            // Servers that refuse fetching by commit need the full history.
            Err(e) => {
                tracing::debug!(error = %e, "shallow fetch by commit refused, fetching all");
                self.git_in(dest, &["fetch", "--quiet", url]).await?;
            }
        }
        self.git_in(dest, &["checkout", "--quiet", "--detach", version])
            .await?;

        let git_dir = dest.join(".git");
        std::fs::remove_dir_all(&git_dir).map_err(|e| StoreError::io(&git_dir, e))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteRef {
    commit: String,
    name: String,
}

fn parse_ls_remote(stdout: &str) -> Vec<RemoteRef> {
    stdout
        .lines()
        .filter_map(|line| {
            let (commit, name) = line.split_once('\t')?;
            is_commit_hash(commit.trim()).then(|| RemoteRef {
                commit: commit.trim().to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

/// Choose the commit a reference names: a peeled annotated tag first, then a
/// branch, then a lightweight tag, then any match.
fn pick_commit(refs: &[RemoteRef], reference: &str) -> Option<String> {
    let preferences = [
        format!("refs/tags/{reference}^{{}}"),
        format!("refs/heads/{reference}"),
        format!("refs/tags/{reference}"),
        reference.to_string(),
    ];
    preferences
        .iter()
        .find_map(|wanted| refs.iter().find(|r| &r.name == wanted))
        .or_else(|| refs.first())
        .map(|r| r.commit.clone())
}
