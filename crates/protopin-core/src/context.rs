//! Execution context threaded through every pipeline operation.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{CoreError, Result};

/// Default per-command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of concurrent compile invocations.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Cross-cutting options for one invocation.
///
/// The timeout is turned into a single deadline when the context is created,
/// so it bounds the whole tidy + install + compile run rather than each step.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Report planned invocations without executing them.
    pub dry_run: bool,
    /// Run declared post-actions after a group compiles.
    pub post_actions: bool,
    /// Verbose diagnostics.
    pub debug: bool,
    /// Budget for the whole invocation.
    pub timeout: Duration,
    /// Upper bound on concurrently running compiler processes.
    pub concurrency: usize,
    deadline: Instant,
}

impl ExecContext {
    /// Create a context whose deadline starts now.
    pub fn new(timeout: Duration) -> Self {
        ExecContext {
            dry_run: false,
            post_actions: false,
            debug: false,
            timeout,
            concurrency: DEFAULT_CONCURRENCY,
            deadline: deadline_after(timeout),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_post_actions(mut self, enabled: bool) -> Self {
        self.post_actions = enabled;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// The instant after which every pending operation is cancelled.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `fut` until it completes or the deadline passes.
    ///
    /// On expiry the future is dropped, which cancels it at its current
    /// suspension point and runs the destructors of anything it holds.
    pub async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::time::timeout_at(tokio::time::Instant::from_std(self.deadline), fut)
            .await
            .map_err(|_| CoreError::Timeout {
                timeout: self.timeout,
            })
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        ExecContext::new(DEFAULT_TIMEOUT)
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}
