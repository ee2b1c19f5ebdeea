//! Structured concurrency for actor-spawned background work.
//!
//! ```text
//!              ┌────────────────┐
//!              │  ScopedRunner  │  root scope, task counter,
//!              └───────┬────────┘  uncaught-error sink
//!                      │ start_thread(scope)
//!          ┌───────────┼───────────┐
//!          ▼           ▼           ▼
//!      ┌───────┐   ┌───────┐   ┌───────┐
//!      │ check │   │ check │   │ check │   child scopes, each holding a
//!      └───────┘   └───────┘   └───────┘   child CancellationToken
//! ```
//!
//! Every background check runs under an [`EventScope`]: cancelling a scope
//! cancels its entire subtree, and a task can leave its own scope early by
//! returning [`WatcherError::ScopeExit`]. Expected benign errors (lost
//! races against other actors) are converted into scope exits through
//! [`EventScope::exit_on_expected_error`]; everything else lands in the
//! runner's uncaught-error sink.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{ErrorMatcher, WatcherError, WatcherResult};
use crate::metrics::WatcherMetrics;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// A cancellation scope. Child scopes are cancelled with their parent.
pub struct EventScope {
    id: u64,
    token: CancellationToken,
    children: Mutex<Vec<Arc<EventScope>>>,
}

impl EventScope {
    fn with_token(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            token,
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::with_token(CancellationToken::new())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Create a child scope; cancelled together with this scope.
    pub fn new_child(self: &Arc<Self>) -> Arc<EventScope> {
        let child = Self::with_token(self.token.child_token());
        if let Ok(mut children) = self.children.lock() {
            children.push(child.clone());
        }
        child
    }

    /// Cancel this scope and all its children.
    pub fn finish(&self) {
        self.token.cancel();
    }

    /// Drop a finished child so long-lived scopes do not accumulate one
    /// entry per completed task.
    fn remove_child(&self, id: u64) {
        if let Ok(mut children) = self.children.lock() {
            children.retain(|c| c.id != id);
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_finished(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Leave this scope: always returns `Err(ScopeExit)` targeting this
    /// scope, for use as the tail expression of a scoped task.
    pub fn exit<T>(&self) -> WatcherResult<T> {
        Err(WatcherError::ScopeExit {
            scope: Some(self.id),
        })
    }

    /// Convert expected benign errors into a scope exit; re-raise anything
    /// else. Typical use: `.or_else(|e| scope.exit_on_expected_error(e, ALLOWED))?`.
    pub fn exit_on_expected_error<T>(
        &self,
        err: WatcherError,
        expected: &[ErrorMatcher],
    ) -> WatcherResult<T> {
        if expected.iter().any(|m| m.matches(&err)) {
            debug!(scope = self.id, %err, "expected error, exiting scope");
            Err(WatcherError::ScopeExit {
                scope: Some(self.id),
            })
        } else {
            Err(err)
        }
    }
}

/// Spawns scoped background tasks and tracks their completion. Errors that
/// are neither recoverable nor scope exits are collected for inspection
/// (tests) and counted (metrics).
#[derive(Clone)]
pub struct ScopedRunner {
    root: Arc<EventScope>,
    running: Arc<AtomicUsize>,
    uncaught_errors: Arc<Mutex<Vec<WatcherError>>>,
    metrics: Option<Arc<WatcherMetrics>>,
}

impl ScopedRunner {
    pub fn new(metrics: Option<Arc<WatcherMetrics>>) -> Self {
        Self {
            root: EventScope::new(),
            running: Arc::new(AtomicUsize::new(0)),
            uncaught_errors: Arc::new(Mutex::new(Vec::new())),
            metrics,
        }
    }

    pub fn root_scope(&self) -> Arc<EventScope> {
        self.root.clone()
    }

    /// Spawn `f` in a fresh child scope of the root. The task races against
    /// scope cancellation; a `ScopeExit` error is a clean completion, any
    /// other error is recorded as uncaught.
    pub fn start_thread<F, Fut>(&self, f: F)
    where
        F: FnOnce(Arc<EventScope>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = WatcherResult<()>> + Send + 'static,
    {
        let scope = self.root.new_child();
        let root = self.root.clone();
        let running = self.running.clone();
        let uncaught = self.uncaught_errors.clone();
        let metrics = self.metrics.clone();
        running.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = scope.cancelled() => Ok(()),
                r = f(scope.clone()) => r,
            };
            match result {
                Ok(()) => {}
                Err(WatcherError::ScopeExit { scope: exited }) => {
                    // A scope exit aimed at this scope (or unset) is a clean
                    // completion; one aimed elsewhere would mean a scope id
                    // leaked across tasks, which the constructors prevent.
                    debug!(scope = scope.id(), exited = ?exited, "task exited its scope");
                }
                Err(err) => {
                    error!(scope = scope.id(), %err, "uncaught error in scoped task");
                    if let Some(m) = &metrics {
                        m.uncaught_task_errors.inc();
                    }
                    if let Ok(mut sink) = uncaught.lock() {
                        sink.push(err);
                    }
                }
            }
            scope.finish();
            root.remove_child(scope.id());
            running.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Wait until no spawned tasks remain. Test and shutdown aid.
    pub async fn wait_for_idle(&self) {
        while self.running.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn running_tasks(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Drain the uncaught-error sink.
    pub fn take_uncaught_errors(&self) -> Vec<WatcherError> {
        match self.uncaught_errors.lock() {
            Ok(mut sink) => std::mem::take(&mut *sink),
            Err(_) => Vec::new(),
        }
    }

    /// Cancel the root scope and everything under it.
    pub fn finish(&self) {
        self.root.finish();
    }
}
