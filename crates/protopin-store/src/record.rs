//! Installation records.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use protopin_core::fsutil::atomic_write;
use protopin_core::{CacheKey, ToolKind};

use crate::error::{Result, StoreError};
use crate::integrity::digest_tree;

/// Record file written inside every published entry.
pub const RECORD_FILE: &str = ".protopin-install.json";

/// On-disk form of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecordFile {
    pub kind: ToolKind,
    pub name: String,
    pub version: String,
    /// SHA-256 tree digest at publish time.
    pub digest: String,
    /// Unix seconds.
    pub installed_at: u64,
    #[serde(default)]
    pub source: Option<String>,
}

impl RecordFile {
    pub fn new(key: &CacheKey, digest: String, source: Option<String>) -> Self {
        RecordFile {
            kind: key.kind,
            name: key.name.clone(),
            version: key.version.clone(),
            digest,
            installed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            source,
        }
    }

    fn matches(&self, key: &CacheKey) -> bool {
        self.kind == key.kind && self.name == key.name && self.version == key.version
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        atomic_write(&dir.join(RECORD_FILE), &json)?;
        Ok(())
    }
}

/// Condition of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallState {
    /// Published and, when checked, matching its digest.
    Present,
    /// A directory exists but cannot be trusted.
    Corrupted,
    /// Nothing is installed.
    Missing,
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InstallState::Present => "present",
            InstallState::Corrupted => "corrupted",
            InstallState::Missing => "missing",
        })
    }
}

/// A cache entry as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationRecord {
    pub key: CacheKey,
    pub path: PathBuf,
    pub state: InstallState,
    pub digest: Option<String>,
    pub installed_at: Option<u64>,
    pub source: Option<String>,
}

impl InstallationRecord {
    pub fn is_present(&self) -> bool {
        self.state == InstallState::Present
    }
}

/// Examine the entry for `key` at `dir`.
///
/// Without `verify` only the record is checked; with it the tree is
/// re-digested and compared against the record.
pub(crate) fn inspect_entry(key: &CacheKey, dir: &Path, verify: bool) -> InstallationRecord {
    let mut record = InstallationRecord {
        key: key.clone(),
        path: dir.to_path_buf(),
        state: InstallState::Missing,
        digest: None,
        installed_at: None,
        source: None,
    };
    if !dir.exists() {
        return record;
    }

    record.state = InstallState::Corrupted;
    let Some(file) = read_record(dir) else {
        return record;
    };
    if !file.matches(key) {
        return record;
    }
    record.digest = Some(file.digest.clone());
    record.installed_at = Some(file.installed_at);
    record.source = file.source.clone();

    if verify {
        match digest_tree(dir) {
            Ok(actual) if actual.as_str() == file.digest => {}
            Ok(actual) => {
                tracing::warn!(%key, expected = %file.digest, %actual, "digest mismatch");
                return record;
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to digest entry");
                return record;
            }
        }
    }
    record.state = InstallState::Present;
    record
}

fn read_record(dir: &Path) -> Option<RecordFile> {
    let bytes = std::fs::read(dir.join(RECORD_FILE)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Remove an untrusted entry so it can be re-fetched.
pub(crate) fn remove_entry(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(dir, e)),
    }
}
