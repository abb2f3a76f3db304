//! The toolchain store.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

use protopin_core::{
    CacheKey, Event, ExecContext, FileLock, FileLockOptions, InstallRequest, KeyedLocks,
    Observer, ToolKind, ToolRef, VersionSpec,
};

use crate::error::{Result, StoreError};
use crate::integrity::{digest_tree, ContentHash};
use crate::record::{inspect_entry, remove_entry, InstallState, InstallationRecord, RecordFile};
use crate::source::ToolchainSource;

const STAGING_DIR: &str = ".staging";
const LOCK_DIR: &str = ".locks";

/// Bounded retry for transient network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        RetryPolicy {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Exclusive access to one key, in this process and across processes.
///
/// Dropping it releases the lock file, then the in-process mutex.
pub struct KeyGuard {
    _file: FileLock,
    _memory: OwnedMutexGuard<()>,
}

/// Installs tools into a cache root and locates them afterwards.
pub struct ToolchainStore {
    root: PathBuf,
    source: Arc<dyn ToolchainSource>,
    locks: KeyedLocks,
    lock_options: FileLockOptions,
    retry: RetryPolicy,
    verify_entries: bool,
}

impl ToolchainStore {
    /// Create a store rooted at `root`, fetching from `source`.
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn ToolchainSource>) -> Self {
        ToolchainStore {
            root: root.into(),
            source,
            locks: KeyedLocks::new(),
            lock_options: FileLockOptions::default(),
            retry: RetryPolicy::default(),
            verify_entries: false,
        }
    }

    /// The default cache root (`~/.protopin`).
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".protopin"))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lock_options(mut self, options: FileLockOptions) -> Self {
        self.lock_options = options;
        self
    }

    /// Re-digest installed entries before trusting them. Off by default:
    /// the record and the binary are enough to skip an install, and
    /// [`inspect`](Self::inspect) with `verify` finds tampered trees.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_entries = verify;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> &Arc<dyn ToolchainSource> {
        &self.source
    }

    /// Directory of the entry for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// The file callers use from an entry: the protoc or plugin executable,
    /// or the checkout directory of a repository.
    pub fn binary_path(&self, key: &CacheKey) -> PathBuf {
        let dir = self.path_for(key);
        let exe = std::env::consts::EXE_SUFFIX;
        match key.kind {
            ToolKind::Protoc => dir.join("bin").join(format!("protoc{exe}")),
            ToolKind::Plugin => dir.join("bin").join(format!("{}{exe}", key.name)),
            ToolKind::Repository => dir,
        }
    }

    /// Resolve a floating specifier to an exact version through the source.
    pub async fn resolve_version(
        &self,
        ctx: &ExecContext,
        tool: &ToolRef,
        spec: &VersionSpec,
    ) -> Result<String> {
        if let Some(pinned) = spec.pinned() {
            return Ok(pinned.to_string());
        }
        let lookup = self.retrying(
            |_| self.source.resolve(tool, spec),
            |attempt, error| tracing::warn!(%tool, attempt, %error, "retrying version lookup"),
        );
        ctx.bounded(lookup).await?
    }

    /// Install one tool at one exact version, returning its entry directory.
    ///
    /// Concurrent calls for the same key, from this store or any other store
    /// sharing the root, fetch at most once and all return the same path.
    pub async fn install(
        &self,
        ctx: &ExecContext,
        observer: &dyn Observer,
        request: &InstallRequest,
    ) -> Result<PathBuf> {
        let key = request.key()?;
        let dir = self.path_for(&key);

        if self.installed(&key, &dir).await {
            observer.on_event(&Event::InstallSkipped {
                key,
                path: dir.clone(),
            });
            return Ok(dir);
        }
        ctx.bounded(self.install_locked(observer, request, key, dir))
            .await?
    }

    pub async fn install_protoc(
        &self,
        ctx: &ExecContext,
        observer: &dyn Observer,
        requests: &[InstallRequest],
    ) -> Result<Vec<PathBuf>> {
        self.install_kind(ctx, observer, ToolKind::Protoc, requests)
            .await
    }

    pub async fn install_plugins(
        &self,
        ctx: &ExecContext,
        observer: &dyn Observer,
        requests: &[InstallRequest],
    ) -> Result<Vec<PathBuf>> {
        self.install_kind(ctx, observer, ToolKind::Plugin, requests)
            .await
    }

    pub async fn install_repositories(
        &self,
        ctx: &ExecContext,
        observer: &dyn Observer,
        requests: &[InstallRequest],
    ) -> Result<Vec<PathBuf>> {
        self.install_kind(ctx, observer, ToolKind::Repository, requests)
            .await
    }

    async fn install_kind(
        &self,
        ctx: &ExecContext,
        observer: &dyn Observer,
        kind: ToolKind,
        requests: &[InstallRequest],
    ) -> Result<Vec<PathBuf>> {
        if let Some(other) = requests.iter().find(|r| r.tool.kind != kind) {
            return Err(StoreError::Unsupported {
                detail: format!("{} passed to the {kind} installer", other.tool),
            });
        }
        futures::future::try_join_all(
            requests
                .iter()
                .map(|request| self.install(ctx, observer, request)),
        )
        .await
    }

    /// Installed entry directory for `key`.
    ///
    /// Fails with [`StoreError::NotFound`] when the key was never installed
    /// or its entry is not trustworthy; callers must install first.
    pub fn locate(&self, key: &CacheKey) -> Result<PathBuf> {
        let dir = self.path_for(key);
        if inspect_entry(key, &dir, false).is_present() {
            Ok(dir)
        } else {
            Err(StoreError::NotFound { key: key.clone() })
        }
    }

    /// Like [`locate`](Self::locate), returning [`binary_path`](Self::binary_path).
    pub fn locate_binary(&self, key: &CacheKey) -> Result<PathBuf> {
        self.locate(key)?;
        let path = self.binary_path(key);
        if path.exists() {
            Ok(path)
        } else {
            Err(StoreError::NotFound { key: key.clone() })
        }
    }

    /// Current record for `key`; `verify` re-digests the tree.
    pub fn inspect(&self, key: &CacheKey, verify: bool) -> InstallationRecord {
        inspect_entry(key, &self.path_for(key), verify)
    }

    /// Every entry under the root, sorted by key.
    pub fn list(&self) -> Result<Vec<InstallationRecord>> {
        let mut records = Vec::new();
        for kind in ToolKind::ALL {
            let kind_dir = self.root.join(kind.as_str());
            for name in child_dirs(&kind_dir)? {
                for version in child_dirs(&kind_dir.join(&name))? {
                    if let Ok(key) = CacheKey::new(kind, name.clone(), version) {
                        records.push(self.inspect(&key, false));
                    }
                }
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    /// Take a named lock shared with every store on this root. Used to
    /// serialize work that is not a cache entry, such as config writes.
    pub async fn lock_named(&self, ctx: &ExecContext, name: &str) -> Result<KeyGuard> {
        protopin_core::kind::validate_component("lock name", name)?;
        ctx.bounded(self.acquire(name, || {})).await?
    }

    async fn install_locked(
        &self,
        observer: &dyn Observer,
        request: &InstallRequest,
        key: CacheKey,
        dir: PathBuf,
    ) -> Result<PathBuf> {
        let _guard = self
            .acquire(&key.lock_file_name(), || {
                observer.on_event(&Event::InstallWaiting { key: key.clone() })
            })
            .await?;

        // Whoever held the lock before us may have published it.
        let existing = self.inspect_verified(&key, &dir).await;
        match existing.state {
            InstallState::Present => {
                observer.on_event(&Event::InstallSkipped {
                    key,
                    path: dir.clone(),
                });
                return Ok(dir);
            }
            InstallState::Corrupted => {
                remove_entry(&dir)?;
                observer.on_event(&Event::CorruptEntryRemoved {
                    key: key.clone(),
                    path: dir.clone(),
                });
            }
            InstallState::Missing => {}
        }

        observer.on_event(&Event::InstallStarted { key: key.clone() });
        let staging_root = self.root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging_root).map_err(|e| StoreError::io(&staging_root, e))?;
        // Removed on drop, including when the install is cancelled.
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}-", key.lock_file_name().trim_end_matches(".lock")))
            .tempdir_in(&staging_root)
            .map_err(|e| StoreError::io(&staging_root, e))?;

        let staged = self
            .retrying(
                |attempt| {
                    let attempt_dir = staging.path().join(format!("attempt-{attempt}"));
                    let key = &key;
                    async move {
                        std::fs::create_dir_all(&attempt_dir)
                            .map_err(|e| StoreError::io(&attempt_dir, e))?;
                        self.source
                            .fetch(&request.tool, &request.version, &attempt_dir)
                            .await
                            .map_err(|e| match e {
                                StoreError::Network { .. } => e,
                                other => StoreError::Install {
                                    key: key.clone(),
                                    detail: other.to_string(),
                                },
                            })?;
                        Ok(attempt_dir)
                    }
                },
                |attempt, error| {
                    observer.on_event(&Event::InstallRetry {
                        key: key.clone(),
                        attempt,
                        error: error.to_string(),
                    })
                },
            )
            .await?;

        let digest = digest_blocking(staged.clone()).await?;
        RecordFile::new(&key, digest.0.clone(), request.tool.source.clone()).write(&staged)?;

        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        std::fs::rename(&staged, &dir).map_err(|e| StoreError::Install {
            key: key.clone(),
            detail: format!("publishing to {}: {e}", dir.display()),
        })?;

        let actual = digest_blocking(dir.clone()).await?;
        if actual != digest {
            remove_entry(&dir)?;
            return Err(StoreError::Integrity {
                key,
                expected: digest.0,
                actual: actual.0,
            });
        }

        observer.on_event(&Event::Installed {
            key,
            path: dir.clone(),
            digest: digest.0,
        });
        Ok(dir)
    }

    /// In-process mutex first, then the lock file. `on_wait` fires once if
    /// either is contended.
    async fn acquire(&self, name: &str, on_wait: impl Fn()) -> Result<KeyGuard> {
        let mut waited = false;
        let memory = match self.locks.try_acquire(name) {
            Some(guard) => guard,
            None => {
                on_wait();
                waited = true;
                self.locks.acquire(name).await
            }
        };

        let path = self.root.join(LOCK_DIR).join(name);
        let file = match FileLock::try_acquire(&path, &self.lock_options)? {
            Some(lock) => lock,
            None => {
                if !waited {
                    on_wait();
                }
                FileLock::acquire(&path, &self.lock_options).await?
            }
        };
        Ok(KeyGuard {
            _file: file,
            _memory: memory,
        })
    }

    /// Run `op` until it succeeds, fails permanently, or the policy runs out.
    /// `on_retry` sees the number of the attempt about to start.
    async fn retrying<T, F, Fut>(&self, mut op: F, on_retry: impl Fn(u32, &StoreError)) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                    on_retry(attempt, &e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fast path of `install`. Only reads the record unless verification
    /// is on; entries that fail it are re-checked with a full digest under
    /// the key lock.
    async fn installed(&self, key: &CacheKey, dir: &Path) -> bool {
        if self.verify_entries {
            return self.inspect_verified(key, dir).await.is_present();
        }
        inspect_entry(key, dir, false).is_present() && self.binary_path(key).exists()
    }

    async fn inspect_verified(&self, key: &CacheKey, dir: &Path) -> InstallationRecord {
        let (key, dir) = (key.clone(), dir.to_path_buf());
        let fallback = InstallationRecord {
            key: key.clone(),
            path: dir.clone(),
            state: InstallState::Corrupted,
            digest: None,
            installed_at: None,
            source: None,
        };
        tokio::task::spawn_blocking(move || inspect_entry(&key, &dir, true))
            .await
            .unwrap_or(fallback)
    }
}

async fn digest_blocking(dir: PathBuf) -> Result<ContentHash> {
    tokio::task::spawn_blocking(move || digest_tree(&dir))
        .await
        .map_err(|e| StoreError::Unsupported {
            detail: format!("digest task failed: {e}"),
        })?
}

fn child_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use protopin_core::MemoryObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes `bin/<name>` after a short delay, counting fetches.
    #[derive(Default)]
    struct FakeSource {
        fetches: AtomicUsize,
        transient_failures: AtomicUsize,
        hang: bool,
    }

    #[async_trait]
    impl ToolchainSource for FakeSource {
        async fn list_versions(&self, _tool: &ToolRef) -> Result<Vec<String>> {
            Ok(vec!["3.19.4".to_string(), "3.20.0".to_string()])
        }

        async fn fetch(&self, tool: &ToolRef, version: &str, dest: &Path) -> Result<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Network {
                    url: "fake://".to_string(),
                    detail: "connection reset".to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            let bin = dest.join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            std::fs::write(bin.join(&tool.name), format!("{} {version}", tool.name)).unwrap();
            Ok(())
        }
    }

    fn fast_locks() -> FileLockOptions {
        FileLockOptions {
            poll_interval: Duration::from_millis(5),
            ..FileLockOptions::default()
        }
    }

    fn store(root: &Path, source: Arc<FakeSource>) -> ToolchainStore {
        ToolchainStore::new(root, source)
            .with_lock_options(fast_locks())
            .with_retry(RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            })
    }

    fn protoc_request(version: &str) -> InstallRequest {
        InstallRequest::new(ToolRef::new(ToolKind::Protoc, "protoc"), version)
    }

    fn plugin_request(version: &str) -> InstallRequest {
        let tool = ToolRef::new(ToolKind::Plugin, "protoc-gen-go")
            .with_source("google.golang.org/protobuf/cmd/protoc-gen-go");
        InstallRequest::new(tool, version)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_installs_fetch_once() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let store = Arc::new(store(tmp.path(), source.clone()));
        let ctx = ExecContext::default();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                store
                    .install(&ctx, &MemoryObserver::new(), &protoc_request("3.19.4"))
                    .await
                    .unwrap()
            }));
        }
        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap());
        }

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(paths.iter().all(|p| p == &paths[0]));
        assert_eq!(paths[0], tmp.path().join("protoc/protoc/3.19.4"));
        assert!(paths[0].join("bin/protoc").is_file());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stores_sharing_a_root_fetch_once() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let a = store(tmp.path(), source.clone());
        let b = store(tmp.path(), source.clone());
        let ctx = ExecContext::default();
        let observer = MemoryObserver::new();
        let request = plugin_request("v1.28.1");

        let (pa, pb) = tokio::join!(
            a.install(&ctx, &observer, &request),
            b.install(&ctx, &observer, &request)
        );
        assert_eq!(pa.unwrap(), pb.unwrap());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            observer.count(|e| matches!(e, Event::Installed { .. })),
            1
        );
        // Lock files are gone once both installers finish.
        let locks = std::fs::read_dir(tmp.path().join(LOCK_DIR)).unwrap().count();
        assert_eq!(locks, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn different_keys_install_independently() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let store = store(tmp.path(), source.clone());
        let ctx = ExecContext::default();
        let observer = MemoryObserver::new();

        let paths = store
            .install_protoc(
                &ctx,
                &observer,
                &[protoc_request("3.19.4"), protoc_request("3.20.0")],
            )
            .await
            .unwrap();
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(
            observer.count(|e| matches!(e, Event::InstallWaiting { .. })),
            0
        );
    }

    #[tokio::test]
    async fn installed_entries_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let store = store(tmp.path(), source.clone());
        let ctx = ExecContext::default();
        let observer = MemoryObserver::new();

        store.install(&ctx, &observer, &protoc_request("3.19.4")).await.unwrap();
        store.install(&ctx, &observer, &protoc_request("3.19.4")).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            observer.count(|e| matches!(e, Event::InstallSkipped { .. })),
            1
        );
    }

    #[tokio::test]
    async fn corrupted_entries_are_refetched() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let store = store(tmp.path(), source.clone());
        let ctx = ExecContext::default();
        let observer = MemoryObserver::new();
        let request = protoc_request("3.19.4");
        let key = request.key().unwrap();

        let store = store.with_verification(true);
        let dir = store.install(&ctx, &observer, &request).await.unwrap();
        std::fs::write(dir.join("bin/protoc"), b"tampered").unwrap();
        assert_eq!(store.inspect(&key, true).state, InstallState::Corrupted);

        store.install(&ctx, &observer, &request).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(
            observer.count(|e| matches!(e, Event::CorruptEntryRemoved { .. })),
            1
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("bin/protoc")).unwrap(),
            "protoc 3.19.4"
        );
    }

    #[tokio::test]
    async fn installed_entries_are_trusted_by_their_record() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let store = store(tmp.path(), source.clone());
        let ctx = ExecContext::default();
        let observer = MemoryObserver::new();
        let request = protoc_request("3.19.4");
        let key = request.key().unwrap();

        let dir = store.install(&ctx, &observer, &request).await.unwrap();
        std::fs::write(dir.join("bin/protoc"), b"tampered").unwrap();

        // The tree is not re-read: the record still matches, so nothing is fetched.
        store.install(&ctx, &observer, &request).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            observer.count(|e| matches!(e, Event::InstallSkipped { .. })),
            1
        );
        assert_eq!(store.inspect(&key, true).state, InstallState::Corrupted);

        // A missing binary is not trusted even with an intact record.
        std::fs::remove_file(dir.join("bin/protoc")).unwrap();
        store.install(&ctx, &observer, &request).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(
            std::fs::read_to_string(dir.join("bin/protoc")).unwrap(),
            "protoc 3.19.4"
        );
    }

    #[tokio::test]
    async fn partial_entries_are_refetched() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::default());
        let store = store(tmp.path(), source.clone());
        let request = protoc_request("3.19.4");
        let key = request.key().unwrap();

        // A directory without a record, as left by an interrupted copy.
        std::fs::create_dir_all(store.path_for(&key).join("bin")).unwrap();
        assert!(matches!(store.locate(&key), Err(StoreError::NotFound { .. })));

        store
            .install(&ExecContext::default(), &MemoryObserver::new(), &request)
            .await
            .unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(store.locate(&key).is_ok());
    }

    #[tokio::test]
    async fn locate_requires_install() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), Arc::new(FakeSource::default()));
        let key = CacheKey::new(ToolKind::Plugin, "protoc-gen-go", "v1.28.1").unwrap();

        assert!(matches!(store.locate(&key), Err(StoreError::NotFound { .. })));
        store
            .install(&ExecContext::default(), &MemoryObserver::new(), &plugin_request("v1.28.1"))
            .await
            .unwrap();
        assert_eq!(store.locate(&key).unwrap(), store.path_for(&key));
        let binary = store.locate_binary(&key).unwrap();
        assert!(binary.ends_with(format!("bin/protoc-gen-go{}", std::env::consts::EXE_SUFFIX)));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource {
            transient_failures: AtomicUsize::new(2),
            ..FakeSource::default()
        });
        let store = store(tmp.path(), source.clone());
        let observer = MemoryObserver::new();

        store
            .install(&ExecContext::default(), &observer, &protoc_request("3.19.4"))
            .await
            .unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(
            observer.count(|e| matches!(e, Event::InstallRetry { .. })),
            2
        );
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource {
            transient_failures: AtomicUsize::new(10),
            ..FakeSource::default()
        });
        let store = store(tmp.path(), source.clone());

        let err = store
            .install(&ExecContext::default(), &MemoryObserver::new(), &protoc_request("3.19.4"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        let key = protoc_request("3.19.4").key().unwrap();
        assert_eq!(store.inspect(&key, false).state, InstallState::Missing);
    }

    #[tokio::test]
    async fn timeout_leaves_no_partial_state() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource {
            hang: true,
            ..FakeSource::default()
        });
        let store = store(tmp.path(), source);
        let ctx = ExecContext::new(Duration::from_millis(50));

        let err = store
            .install(&ctx, &MemoryObserver::new(), &protoc_request("3.19.4"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));

        let key = protoc_request("3.19.4").key().unwrap();
        assert_eq!(store.inspect(&key, false).state, InstallState::Missing);
        assert_eq!(std::fs::read_dir(tmp.path().join(STAGING_DIR)).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(tmp.path().join(LOCK_DIR)).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn resolve_version_uses_the_source() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), Arc::new(FakeSource::default()));
        let tool = ToolRef::new(ToolKind::Protoc, "protoc");
        let version = store
            .resolve_version(&ExecContext::default(), &tool, &VersionSpec::Latest)
            .await
            .unwrap();
        assert_eq!(version, "3.20.0");
    }

    #[tokio::test]
    async fn list_reports_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), Arc::new(FakeSource::default()));
        let ctx = ExecContext::default();
        let observer = MemoryObserver::new();
        store.install(&ctx, &observer, &protoc_request("3.19.4")).await.unwrap();
        store.install(&ctx, &observer, &plugin_request("v1.28.1")).await.unwrap();

        let records = store.list().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.kind, ToolKind::Protoc);
        assert!(records.iter().all(|r| r.is_present()));
    }

    #[tokio::test]
    async fn mismatched_kind_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), Arc::new(FakeSource::default()));
        let err = store
            .install_plugins(
                &ExecContext::default(),
                &MemoryObserver::new(),
                &[protoc_request("3.19.4")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { .. }));
    }

    #[test]
    fn retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(2), Duration::from_millis(500));
        assert_eq!(policy.delay(3), Duration::from_millis(1000));
        assert_eq!(RetryPolicy::none().attempts, 1);
    }
}
