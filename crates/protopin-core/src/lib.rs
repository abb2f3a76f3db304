//! Shared primitives for the protopin toolchain manager.
//!
//! Everything the tidy → install → compile pipeline threads through its
//! operations lives here:
//! - **Execution context**: dry-run, post-action, debug and deadline options
//!   passed explicitly to every operation
//! - **Observer events**: structured progress reported to an injected
//!   observer instead of a terminal
//! - **Tool identity**: tool kinds, references and cache keys
//! - **Version specifiers**: exact pins versus floating requirements
//! - **Locks**: per-key in-process mutexes and cooperating-process lock files

pub mod context;
pub mod error;
pub mod event;
pub mod fsutil;
pub mod kind;
pub mod lock;
pub mod state;
pub mod version;

pub use context::ExecContext;
pub use error::{CoreError, Result};
pub use event::{Event, MemoryObserver, NullObserver, Observer, TracingObserver};
pub use kind::{CacheKey, InstallRequest, ToolKind, ToolRef};
pub use lock::{FileLock, FileLockOptions, KeyedLocks};
pub use state::TargetState;
pub use version::VersionSpec;
