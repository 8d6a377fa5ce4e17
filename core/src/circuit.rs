//! Circuit breaker gate
//!
//! Runs an async action under an opaque circuit-breaker policy: admission is
//! checked before the action is invoked, and the policy's success/error
//! bookkeeping fires exactly once per permitted attempt. The sliding-window
//! state machine behind the permission decision lives in the policy, not
//! here.

use crate::completion::{Completion, Execution};
use crate::errors::GateError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Capability contract consumed from a circuit-breaker engine
///
/// Implementations are shared across concurrent invocations and must
/// synchronize internally. The gate guarantees that `on_success`/`on_error`
/// run exactly once per permitted attempt and never for a denied one; the
/// policy does not need to be idempotent.
pub trait CircuitBreakerPolicy<T, E>: Send + Sync {
    /// Identifying name, used in errors and log events
    fn name(&self) -> &str;

    /// Whether one more attempt may proceed; a denial records nothing
    fn try_acquire_permission(&self) -> bool;

    /// Record one permitted attempt that succeeded
    fn on_success(&self, elapsed: Duration, value: &T);

    /// Record one permitted attempt that failed
    fn on_error(&self, elapsed: Duration, error: &E);
}

/// Execute `action` under circuit-breaker protection
///
/// Returns immediately with a pending [`Execution`]; the action's future is
/// supervised on a spawned task. Must be called within a Tokio runtime.
pub fn execute<P, F, Fut, T, E>(policy: Arc<P>, action: F) -> Execution<T, GateError<E>>
where
    P: CircuitBreakerPolicy<T, E> + ?Sized + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (completion, execution) = Completion::new();

    if !policy.try_acquire_permission() {
        debug!(circuit = policy.name(), "call not permitted");
        completion.try_fail(GateError::CallNotPermitted {
            name: policy.name().to_string(),
        });
        return execution;
    }

    let start = Instant::now();
    let fut = action();
    tokio::spawn(async move {
        match fut.await {
            Ok(value) => {
                policy.on_success(start.elapsed(), &value);
                completion.try_complete(value);
            }
            Err(error) => {
                policy.on_error(start.elapsed(), &error);
                completion.try_fail(GateError::Execution(error));
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
    P: CircuitBreakerPolicy<T, E> + ?Sized + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    move || execute(policy.clone(), &mut action)
}
