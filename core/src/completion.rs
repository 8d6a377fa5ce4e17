//! Write-once completion cell shared by all gates
//!
//! Every gated invocation hands the caller an [`Execution`] future up front
//! and keeps one or more [`Completion`] handles for itself. However many
//! tasks race to resolve the cell (an action finishing, a timeout firing),
//! exactly one `try_complete`/`try_fail` call wins; the rest observe `false`
//! and have no effect. The pending-to-resolved transition is decided by a
//! single compare-and-swap, never by check-then-act.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

struct Shared<T, E> {
    claimed: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Result<T, E>>>>,
}

/// Write half of a completion cell
///
/// Clonable; all clones settle the same cell. Settling is non-blocking and
/// O(1) from any task or thread.
pub struct Completion<T, E> {
    shared: Arc<Shared<T, E>>,
}

/// One-shot settlement token handed to the claim winner
///
/// Lets a gate account the outcome with the policy by reference after
/// winning the race but before moving the value or error into the cell.
#[must_use]
pub(crate) struct Settlement<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
}

impl<T, E> Settlement<T, E> {
    pub(crate) fn complete(self, value: T) {
        // The receiver may already be gone; the invocation still ran.
        let _ = self.tx.send(Ok(value));
    }

    pub(crate) fn fail(self, error: E) {
        let _ = self.tx.send(Err(error));
    }
}

impl<T, E> Completion<T, E> {
    /// Create a fresh cell, returning the write half and the read half
    pub fn new() -> (Completion<T, E>, Execution<T, E>) {
        let (tx, rx) = oneshot::channel();
        let completion = Completion {
            shared: Arc::new(Shared {
                claimed: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
        };
        (completion, Execution { rx })
    }

    /// Atomically claim the right to settle the cell
    ///
    /// Returns `None` if another caller already claimed it. The CAS here is
    /// the only race decider; the mutex take below is uncontended because
    /// only the winner reaches it.
    pub(crate) fn claim(&self) -> Option<Settlement<T, E>> {
        if self
            .shared
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let tx = self
            .shared
            .tx
            .lock()
            .unwrap()
            .take()
            .expect("claim winner must find the sender in place");
        Some(Settlement { tx })
    }

    /// Resolve the cell with a value; returns whether this call won the race
    pub fn try_complete(&self, value: T) -> bool {
        match self.claim() {
            Some(settlement) => {
                settlement.complete(value);
                true
            }
            None => false,
        }
    }

    /// Resolve the cell with an error; returns whether this call won the race
    pub fn try_fail(&self, error: E) -> bool {
        match self.claim() {
            Some(settlement) => {
                settlement.fail(error);
                true
            }
            None => false,
        }
    }

    /// Whether the cell has already been settled
    pub fn is_resolved(&self) -> bool {
        self.shared.claimed.load(Ordering::Acquire)
    }
}

impl<T, E> Clone for Completion<T, E> {
    fn clone(&self) -> Self {
        Completion {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> std::fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Read half of a completion cell, returned to the caller by every gate
///
/// Resolves exactly once with the gated outcome. Dropping it does not cancel
/// the invocation; supervision and policy accounting run to completion
/// regardless.
pub struct Execution<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> Future for Execution<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let rx = &mut self.get_mut().rx;
        Pin::new(rx)
            .poll(cx)
            .map(|settled| settled.expect("completion dropped without resolving"))
    }
}

impl<T, E> std::fmt::Debug for Execution<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution").finish()
    }
}
