//! protoc releases published on GitHub.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use protopin_core::ToolRef;

use super::ToolchainSource;
use crate::error::{Result, StoreError};

const DEFAULT_API: &str = "https://api.github.com";
const DEFAULT_DOWNLOAD: &str = "https://github.com";
const DEFAULT_REPO: &str = "protocolbuffers/protobuf";
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    draft: bool,
}

/// Downloads `protoc-<version>-<platform>.zip` release assets.
///
/// A tool's `source` overrides the `owner/repo` the releases come from.
#[derive(Clone)]
pub struct GithubProtocSource {
    agent: ureq::Agent,
    api_base: String,
    download_base: String,
}

impl GithubProtocSource {
    pub fn new() -> Self {
        GithubProtocSource::with_base_urls(DEFAULT_API, DEFAULT_DOWNLOAD)
    }

    /// Point at a GitHub Enterprise instance or a compatible proxy.
    pub fn with_base_urls(api_base: &str, download_base: &str) -> Self {
        GithubProtocSource {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(120))
                .timeout_connect(Duration::from_secs(15))
                .user_agent(concat!("protopin/", env!("CARGO_PKG_VERSION")))
                .build(),
            api_base: api_base.trim_end_matches('/').to_string(),
            download_base: download_base.trim_end_matches('/').to_string(),
        }
    }

    fn repo(tool: &ToolRef) -> &str {
        tool.source.as_deref().unwrap_or(DEFAULT_REPO)
    }

    fn asset_url(&self, tool: &ToolRef, version: &str, platform: &str) -> String {
        let bare = version.trim_start_matches('v');
        format!(
            "{}/{}/releases/download/v{bare}/protoc-{bare}-{platform}.zip",
            self.download_base,
            Self::repo(tool)
        )
    }
}

impl Default for GithubProtocSource {
    fn default() -> Self {
        GithubProtocSource::new()
    }
}

#[async_trait]
impl ToolchainSource for GithubProtocSource {
    async fn list_versions(&self, tool: &ToolRef) -> Result<Vec<String>> {
        let agent = self.agent.clone();
        let base = format!("{}/repos/{}/releases", self.api_base, Self::repo(tool));
        blocking(move || {
            let mut versions = Vec::new();
            for page in 1..=MAX_PAGES {
                let url = format!("{base}?per_page=100&page={page}");
                let releases: Vec<Release> = agent
                    .get(&url)
                    .set("Accept", "application/vnd.github+json")
                    .call()
                    .map_err(|e| http_error(&url, e))?
                    .into_json()
                    .map_err(|e| StoreError::Network {
                        url: url.clone(),
                        detail: e.to_string(),
                    })?;
                if releases.is_empty() {
                    break;
                }
                versions.extend(
                    releases
                        .into_iter()
                        .filter(|r| !r.draft)
                        .map(|r| r.tag_name.trim_start_matches('v').to_string()),
                );
            }
            Ok(versions)
        })
        .await
    }

    async fn fetch(&self, tool: &ToolRef, version: &str, dest: &Path) -> Result<()> {
        let platform = protoc_platform().ok_or_else(|| StoreError::Unsupported {
            detail: format!(
                "no protoc release for {}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
        })?;
        let url = self.asset_url(tool, version, platform);
        let agent = self.agent.clone();
        let dest = dest.to_path_buf();

        blocking(move || {
            tracing::debug!(%url, "downloading");
            let response = agent.get(&url).call().map_err(|e| http_error(&url, e))?;
            let mut bytes = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut bytes)
                .map_err(|e| StoreError::Network {
                    url: url.clone(),
                    detail: e.to_string(),
                })?;
            extract_zip(&bytes, &dest)
        })
        .await
    }
}

/// Run blocking HTTP work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unsupported {
            detail: format!("download task failed: {e}"),
        })?
}

fn http_error(url: &str, err: ureq::Error) -> StoreError {
    match err {
        // 5xx and rate limiting are worth retrying; other statuses are final.
        ureq::Error::Status(code, _) if code >= 500 || code == 429 => StoreError::Network {
            url: url.to_string(),
            detail: format!("HTTP {code}"),
        },
        ureq::Error::Status(code, _) => StoreError::Unsupported {
            detail: format!("{url} returned HTTP {code}"),
        },
        ureq::Error::Transport(t) => StoreError::Network {
            url: url.to_string(),
            detail: t.to_string(),
        },
    }
}

/// Release asset suffix for the running platform.
pub(crate) fn protoc_platform() -> Option<&'static str> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

fn platform_for(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("linux", "x86_64") => Some("linux-x86_64"),
        ("linux", "aarch64") => Some("linux-aarch_64"),
        ("linux", "x86") => Some("linux-x86_32"),
        ("linux", "powerpc64") => Some("linux-ppcle_64"),
        ("linux", "s390x") => Some("linux-s390_64"),
        ("macos", "x86_64") => Some("osx-x86_64"),
        ("macos", "aarch64") => Some("osx-aarch_64"),
        ("windows", "x86_64") => Some("win64"),
        ("windows", "x86") => Some("win32"),
        _ => None,
    }
}

/// Unpack a release archive, keeping unix permissions.
pub(crate) fn extract_zip(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| {
        StoreError::Unsupported {
            detail: format!("invalid release archive: {e}"),
        }
    })?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| StoreError::Unsupported {
            detail: format!("invalid release archive: {e}"),
        })?;
        let Some(relative) = file.enclosed_name() else {
            tracing::warn!(name = file.name(), "skipping archive entry outside the root");
            continue;
        };
        let out: PathBuf = dest.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| StoreError::io(&out, e))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut target = std::fs::File::create(&out).map_err(|e| StoreError::io(&out, e))?;
        std::io::copy(&mut file, &mut target).map_err(|e| StoreError::io(&out, e))?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode & 0o777))
                .map_err(|e| StoreError::io(&out, e))?;
        }
    }
    Ok(())
}
