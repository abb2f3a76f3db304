//! Content digests for installed trees.
//!
//! An entry's digest covers every file below its directory: relative path,
//! executable bit, and contents, visited in sorted order. The install record
//! itself and any `.git` directory are excluded.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::record::RECORD_FILE;

/// A SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Compute the SHA-256 hash of the given data.
    pub fn compute(data: &[u8]) -> Self {
        ContentHash(hex::encode(Sha256::digest(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that the given data matches this hash.
    pub fn verify(&self, data: &[u8]) -> bool {
        ContentHash::compute(data) == *self
    }

    /// First 16 hex characters, for file names.
    pub fn short(&self) -> &str {
        &self.0[..16.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Digest the tree rooted at `root`.
pub fn digest_tree(root: &Path) -> Result<ContentHash> {
    let mut hasher = Sha256::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");

    let mut buf = vec![0u8; 64 * 1024];
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            StoreError::io(path, e.into())
        })?;
        if entry.depth() == 0 || entry.file_type().is_dir() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if entry.depth() == 1 && entry.file_name() == RECORD_FILE {
            continue;
        }

        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0]);

        if entry.file_type().is_symlink() {
            let target = std::fs::read_link(entry.path())
                .map_err(|e| StoreError::io(entry.path(), e))?;
            hasher.update(b"L");
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            hasher.update(if is_executable(entry.path()) { b"X" } else { b"F" });
            let mut file = std::fs::File::open(entry.path())
                .map_err(|e| StoreError::io(entry.path(), e))?;
            loop {
                let n = file
                    .read(&mut buf)
                    .map_err(|e| StoreError::io(entry.path(), e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
        }
        hasher.update([0]);
    }

    Ok(ContentHash(hex::encode(hasher.finalize())))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}
