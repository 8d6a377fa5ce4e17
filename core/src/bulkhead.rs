//! Bulkhead gate for concurrency limiting
//!
//! Caps how many invocations of one call path may be in flight at once.
//! Admission takes a concurrency slot from the policy; the slot is released
//! exactly once when the action resolves, whatever the outcome. A denied
//! call takes no slot and owes no release.

use crate::completion::{Completion, Execution};
use crate::errors::GateError;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Capability contract consumed from a bulkhead engine
pub trait BulkheadPolicy: Send + Sync {
    /// Identifying name, used in errors and log events
    fn name(&self) -> &str;

    /// Try to take one concurrency slot without blocking
    fn try_acquire_permission(&self) -> bool;

    /// Release one previously taken slot
    fn on_complete(&self);
}

/// Releases the admitted slot exactly once, even if the supervised future
/// panics before settling.
struct SlotRelease<P: BulkheadPolicy + ?Sized> {
    policy: Arc<P>,
}

impl<P: BulkheadPolicy + ?Sized> Drop for SlotRelease<P> {
    fn drop(&mut self) {
        self.policy.on_complete();
    }
}

/// Execute `action` under a concurrency cap
///
/// Returns immediately with a pending [`Execution`]. The slot is released
/// before the execution resolves, so a caller observing the outcome sees
/// the capacity already returned. Must be called within a Tokio runtime.
pub fn execute<P, F, Fut, T, E>(policy: Arc<P>, action: F) -> Execution<T, GateError<E>>
where
    P: BulkheadPolicy + ?Sized + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (completion, execution) = Completion::new();

    if !policy.try_acquire_permission() {
        debug!(bulkhead = policy.name(), "bulkhead full, rejecting call");
        completion.try_fail(GateError::BulkheadFull {
            name: policy.name().to_string(),
        });
        return execution;
    }

    let fut = action();
    tokio::spawn(async move {
        let slot = SlotRelease { policy };
        let result = fut.await;
        drop(slot);
        match result {
            Ok(value) => completion.try_complete(value),
            Err(error) => completion.try_fail(GateError::Execution(error)),
        };
    });

    execution
}

/// Wrap a reusable action so every call goes through [`execute`]
pub fn decorate<P, F, Fut, T, E>(
    policy: Arc<P>,
    mut action: F,
) -> impl FnMut() -> Execution<T, GateError<E>>
where
    P: BulkheadPolicy + ?Sized + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    move || execute(policy.clone(), &mut action)
}

/// Reference bulkhead policy: a named atomic slot counter
///
/// Rejects admission once `limit` slots are taken; releasing is wait-free.
#[derive(Debug)]
pub struct Bulkhead {
    name: String,
    limit: usize,
    acquired: AtomicUsize,
}

impl Bulkhead {
    /// Create a bulkhead with the given concurrency limit
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        assert!(limit > 0, "Bulkhead limit must be greater than 0");
        Self {
            name: name.into(),
            limit,
            acquired: AtomicUsize::new(0),
        }
    }

    /// Get the current number of taken slots
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    /// Get the concurrency limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Get the number of available slots
    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.acquired())
    }
}

impl BulkheadPolicy for Bulkhead {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire_permission(&self) -> bool {
        let mut current = self.acquired.load(Ordering::Acquire);

        loop {
            if current >= self.limit {
                return false;
            }

            match self.acquired.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => {
                    // Another thread moved the counter, try again
                    current = actual;
                }
            }
        }
    }

    fn on_complete(&self) {
        self.acquired.fetch_sub(1, Ordering::Release);
    }
}
