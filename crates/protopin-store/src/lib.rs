//! Toolchain store for protopin.
//!
//! A cache of installed tools keyed by `(kind, name, version)`:
//!
//! ```text
//! <root>/
//!   protoc/protoc/3.19.4/        bin/protoc, include/, .protopin-install.json
//!   plugin/protoc-gen-go/v1.28.1/bin/protoc-gen-go
//!   repository/googleapis/<commit>/
//!   .staging/                    in-flight fetches
//!   .locks/                      one lock file per key being installed
//! ```
//!
//! Installs of the same key are serialized across tasks and across
//! processes sharing the root, so a fetch runs at most once per key. Entries
//! are published by renaming a fully written staging directory, and every
//! entry carries a digest of its tree so corruption is detected and repaired.

pub mod error;
pub mod integrity;
pub mod record;
pub mod source;
pub mod store;

pub use error::{Result, StoreError};
pub use integrity::{digest_tree, ContentHash};
pub use record::{InstallState, InstallationRecord, RECORD_FILE};
pub use source::{
    DefaultSource, GitRepositorySource, GithubProtocSource, GoPluginSource, LocalMirror,
    ToolchainSource,
};
pub use store::{KeyGuard, RetryPolicy, ToolchainStore};
