//! Cooperative cancellation for in-flight cell runs.
//!
//! Every run owns exactly one [`CancelScope`]; the matching
//! [`CancelSignal`] travels into the runner, which can poll the flag,
//! await [`CancelSignal::cancelled`], and register asynchronous cleanup
//! callbacks for resources that outlive the run (timers, sockets,
//! subscriptions). [`CancelScope::cancel`] runs the cleanups in reverse
//! registration order and awaits each one; only after the last resolves
//! is the scope considered fully cancelled.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Notify;

type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl Shared {
    fn cleanups(&self) -> MutexGuard<'_, Vec<Cleanup>> {
        self.cleanups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner side of one run's cancellation, held by the cylinder.
pub struct CancelScope {
    shared: Arc<Shared>,
}

impl CancelScope {
    pub fn new() -> Self {
        CancelScope {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Hands out the runner-facing handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    /// Requests cancellation, wakes every waiter, then runs all registered
    /// cleanups in reverse registration order, awaiting each. A panicking
    /// cleanup is logged and does not stop the rest.
    pub async fn cancel(self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
        self.shared.notify.notify_waiters();
        let cleanups = std::mem::take(&mut *self.shared.cleanups());
        for cleanup in cleanups.into_iter().rev() {
            if AssertUnwindSafe(cleanup()).catch_unwind().await.is_err() {
                tracing::error!("cleanup handler panicked during cancellation");
            }
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        CancelScope::new()
    }
}

impl fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelScope")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Runner-facing cancellation handle. Cloning shares the underlying
/// scope.
#[derive(Clone)]
pub struct CancelSignal {
    shared: Arc<Shared>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    /// Resolves once cancellation has been requested. Usable in `select!`
    /// against the run's own work.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register interest before the final flag check so a wakeup
            // between check and await cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Registers a cleanup future to run when the scope is cancelled.
    ///
    /// Returns `false` when the scope is already cancelled; the callback
    /// is not stored and the caller must release the resource itself.
    pub fn on_cleanup(
        &self,
        cleanup: impl FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    ) -> bool {
        let mut cleanups = self.shared.cleanups();
        if self.is_cancelled() {
            return false;
        }
        cleanups.push(Box::new(cleanup));
        true
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
