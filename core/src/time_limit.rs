//! Time limiter guard
//!
//! Races an async action against a one-shot timeout timer. Whichever side
//! resolves first claims the completion cell; the loser's effect is
//! suppressed by the cell's single-completion guarantee, not by trying to
//! stop the loser from running. Policy accounting follows the claim, so
//! exactly one of success, timeout or action-failure is ever recorded per
//! call.

use crate::completion::{Completion, Execution};
use crate::errors::GateError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Capability contract consumed from a time-limiter configuration
pub trait TimeLimiterPolicy<E>: Send + Sync {
    /// Identifying name, carried by the synthesized timeout error
    fn name(&self) -> &str;

    /// How long the action may run before the timer fires
    fn timeout_duration(&self) -> Duration;

    /// Record a call that completed in time
    fn on_success(&self);

    /// Record a call that timed out or failed; invoked once, for the race
    /// winner only
    fn on_error(&self, error: &GateError<E>);
}

/// Execute `action` under a timeout
///
/// Returns immediately with a pending [`Execution`]. The timer is cancelled
/// best-effort once the action resolves; a timer that already fired loses
/// the race at the completion cell instead. Must be called within a Tokio
/// runtime.
pub fn execute<P, F, Fut, T, E>(policy: Arc<P>, action: F) -> Execution<T, GateError<E>>
where
    P: TimeLimiterPolicy<E> + ?Sized + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (completion, execution) = Completion::new();
    let timeout = policy.timeout_duration();

    let timer = tokio::spawn({
        let completion = completion.clone();
        let policy = policy.clone();
        async move {
            tokio::time::sleep(timeout).await;
            if let Some(settlement) = completion.claim() {
                debug!(
                    time_limiter = policy.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "call timed out"
                );
                let error = GateError::Timeout {
                    name: policy.name().to_string(),
                };
                policy.on_error(&error);
                settlement.fail(error);
            }
        }
    });

    let fut = action();
    tokio::spawn(async move {
        let result = fut.await;
        // Best effort: a timer that already fired has either claimed the
        // cell or lost the race below.
        timer.abort();
        match result {
            Ok(value) => {
                if let Some(settlement) = completion.claim() {
                    policy.on_success();
                    settlement.complete(value);
                }
            }
            Err(error) => {
                if let Some(settlement) = completion.claim() {
                    let error = GateError::Execution(error);
                    policy.on_error(&error);
                    settlement.fail(error);
                }
            }
        }
    });

    execution
}

/// Wrap a reusable action so every call goes through [`execute`]
pub fn decorate<P, F, Fut, T, E>(
    policy: Arc<P>,
    mut action: F,
) -> impl FnMut() -> Execution<T, GateError<E>>
where
    P: TimeLimiterPolicy<E> + ?Sized + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    move || execute(policy.clone(), &mut action)
}

/// Reference time-limiter policy: a name and a fixed timeout
///
/// Accounting hooks are no-ops; implement [`TimeLimiterPolicy`] directly
/// when outcomes need to feed metrics.
#[derive(Debug, Clone)]
pub struct TimeLimiter {
    name: String,
    timeout: Duration,
}

impl TimeLimiter {
    /// Create a time limiter with the given timeout
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
        }
    }
}

impl<E> TimeLimiterPolicy<E> for TimeLimiter {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    fn on_success(&self) {}

    fn on_error(&self, _error: &GateError<E>) {}
}
