//! Shared fixtures: an in-memory version source and a fake protoc.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;

use protopin_core::{ToolKind, ToolRef, VersionSpec};
use protopin_store::{StoreError, ToolchainSource};

pub const COMMIT: &str = "75e9812478607db997376ccea247dd6928f70f45";

/// Stand-in for protoc. Writes `<name>.pb` into the `--fake_out` directory
/// for every input, honours `--descriptor_set_out`, and fails on inputs
/// containing `BROKEN`.
pub const FAKE_PROTOC: &str = r#"#!/bin/sh
out=""
for arg in "$@"; do
  case "$arg" in
    --fake_out=*) out="${arg#--fake_out=}" ;;
    --descriptor_set_out=*) echo descriptor > "${arg#--descriptor_set_out=}" ;;
  esac
done
status=0
for arg in "$@"; do
  case "$arg" in
    -*) ;;
    *.proto)
      if grep -q BROKEN "$arg"; then
        echo "$arg:1:1: syntax error" >&2
        status=1
        continue
      fi
      if [ -n "$out" ]; then
        mkdir -p "$out"
        echo compiled > "$out/$(basename "$arg" .proto).pb"
      fi
      ;;
  esac
done
exit $status
"#;

/// Write `contents` to `dir/relative`, creating parents.
pub fn write(dir: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
}

fn write_executable(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// A fake protoc written once per test process.
pub fn fake_protoc() -> PathBuf {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| {
        let path = std::env::temp_dir()
            .join(format!("protopin-fake-protoc-{}", std::process::id()))
            .join("protoc");
        write_executable(&path, FAKE_PROTOC);
        path
    })
    .clone()
}

/// Serves a fixed version list per kind and installs fake binaries.
#[derive(Default)]
pub struct FakeSource {
    pub lookups: AtomicUsize,
    pub fetches: AtomicUsize,
    hang: bool,
}

impl FakeSource {
    pub fn new() -> Self {
        FakeSource::default()
    }

    /// Version lookups never complete.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[async_trait]
impl ToolchainSource for FakeSource {
    async fn list_versions(&self, tool: &ToolRef) -> Result<Vec<String>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let versions: &[&str] = match tool.kind {
            ToolKind::Protoc => &["3.18.0", "3.19.4", "4.0.0-rc1"],
            ToolKind::Plugin => &["v1.27.1", "v1.28.1"],
            ToolKind::Repository => &[],
        };
        Ok(versions.iter().map(|v| v.to_string()).collect())
    }

    async fn resolve(&self, tool: &ToolRef, spec: &VersionSpec) -> Result<String, StoreError> {
        if tool.kind == ToolKind::Repository && !spec.is_pinned() {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            return Ok(COMMIT.to_string());
        }
        if let Some(pinned) = spec.pinned() {
            return Ok(pinned.to_string());
        }
        let versions = self.list_versions(tool).await?;
        protopin_core::version::resolve_best(&versions, spec).ok_or_else(|| {
            StoreError::NoMatchingVersion {
                tool: tool.to_string(),
                spec: format!("{spec:?}"),
            }
        })
    }

    async fn fetch(&self, tool: &ToolRef, version: &str, dest: &Path) -> Result<(), StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        match tool.kind {
            ToolKind::Protoc => {
                write_executable(&dest.join("bin/protoc"), FAKE_PROTOC);
                write(
                    dest,
                    "include/google/protobuf/any.proto",
                    "syntax = \"proto3\";\n",
                );
            }
            ToolKind::Plugin => {
                write_executable(
                    &dest.join("bin").join(&tool.name),
                    &format!("#!/bin/sh\necho {} {version}\n", tool.name),
                );
            }
            ToolKind::Repository => {
                write(dest, "google/api/annotations.proto", "syntax = \"proto3\";\n");
            }
        }
        Ok(())
    }
}
