//! Rate limiter gate
//!
//! Reserves permits from an opaque rate-limiter policy before running the
//! action. A reservation can be denied, immediate, or delayed; a delayed
//! reservation parks nothing, the action is resumed later by the Tokio
//! timer while the caller already holds the pending execution. The
//! token-bucket arithmetic behind the reservation lives in the policy, not
//! here.

use crate::completion::{Completion, Execution};
use crate::errors::GateError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of a permit reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The permits cannot be granted at all; the call is rejected
    Denied,
    /// The permits are available now
    Ready,
    /// The permits become available after the delay
    Delayed(Duration),
}

/// Capability contract consumed from a rate-limiter engine
pub trait RateLimiterPolicy<T, E>: Send + Sync {
    /// Identifying name, used in errors and log events
    fn name(&self) -> &str;

    /// Reserve `permits` atomically as one unit
    fn reserve_permission(&self, permits: u32) -> Reservation;

    /// Record one permitted attempt that succeeded
    fn on_success(&self, value: &T);

    /// Record one permitted attempt that failed
    fn on_error(&self, error: &E);
}

/// Execute `action` under rate limiting, reserving a single permit
pub fn execute<P, F, Fut, T, E>(policy: Arc<P>, action: F) -> Execution<T, GateError<E>>
where
    P: RateLimiterPolicy<T, E> + ?Sized + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    execute_with_permits(policy, 1, action)
}

/// Execute `action` under rate limiting, reserving `permits` as one unit
///
/// Zero permits is a caller error and is rejected before the policy is
/// consulted. Returns immediately with a pending [`Execution`]; when the
/// reservation carries a delay, the action is invoked on a spawned task once
/// the timer fires. Must be called within a Tokio runtime.
pub fn execute_with_permits<P, F, Fut, T, E>(
    policy: Arc<P>,
    permits: u32,
    action: F,
) -> Execution<T, GateError<E>>
where
    P: RateLimiterPolicy<T, E> + ?Sized + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (completion, execution) = Completion::new();

    if permits == 0 {
        completion.try_fail(GateError::ZeroPermits {
            name: policy.name().to_string(),
        });
        return execution;
    }

    match policy.reserve_permission(permits) {
        Reservation::Denied => {
            debug!(limiter = policy.name(), permits, "request not permitted");
            completion.try_fail(GateError::RequestNotPermitted {
                name: policy.name().to_string(),
            });
        }
        Reservation::Ready => {
            tokio::spawn(run_permitted(policy, action, completion));
        }
        Reservation::Delayed(delay) => {
            debug!(
                limiter = policy.name(),
                permits,
                delay_ms = delay.as_millis() as u64,
                "delaying call until permits are available"
            );
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                run_permitted(policy, action, completion).await;
            });
        }
    }

    execution
}

/// Wrap a reusable action so every call goes through [`execute`]
///
/// The action must be `Clone` because each invocation moves one copy onto
/// the supervising task (the reservation may defer it past the call).
pub fn decorate<P, F, Fut, T, E>(
    policy: Arc<P>,
    action: F,
) -> impl FnMut() -> Execution<T, GateError<E>>
where
    P: RateLimiterPolicy<T, E> + ?Sized + 'static,
    F: FnOnce() -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    move || execute(policy.clone(), action.clone())
}

async fn run_permitted<P, F, Fut, T, E>(
    policy: Arc<P>,
    action: F,
    completion: Completion<T, GateError<E>>,
) where
    P: RateLimiterPolicy<T, E> + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match action().await {
        Ok(value) => {
            policy.on_success(&value);
            completion.try_complete(value);
        }
        Err(error) => {
            policy.on_error(&error);
            completion.try_fail(GateError::Execution(error));
        }
    }
}
