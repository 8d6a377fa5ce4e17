//! Retry orchestrator
//!
//! Drives an async action through repeated attempts under an opaque retry
//! policy. One attempt context is minted per invocation and consulted after
//! every attempt: it alone decides whether to stop or to retry after a
//! backoff delay. The orchestrator is a pure driver: an explicit loop woken
//! by the Tokio timer, so arbitrarily long attempt sequences never deepen
//! the stack.
//!
//! [`BackoffRetry`] is the bundled reference policy: attempt budget and
//! retry predicates live in the adapter while every delay is computed by
//! `chrono-machines`.

use crate::completion::{Completion, Execution};
use crate::errors::{GateError, RetriesExhausted};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Capability contract consumed from a retry engine
pub trait RetryPolicy<T, E>: Send + Sync {
    /// Identifying name, used in log events
    fn name(&self) -> &str;

    /// Mint fresh per-invocation state; never shared across invocations
    fn new_attempt_context(&self) -> Box<dyn AttemptContext<T, E>>;
}

/// Per-invocation retry state, consulted once after every attempt
///
/// A return of `Some(delay)` schedules another attempt after `delay`;
/// `None` stops the sequence (accepting the result or propagating the
/// error).
pub trait AttemptContext<T, E>: Send {
    /// Judge a successful attempt; `Some(delay)` means the result itself
    /// triggers a retry
    fn on_result(&mut self, value: &T) -> Option<Duration>;

    /// Judge a failed attempt
    fn on_error(&mut self, error: &E) -> Option<Duration>;

    /// Finalize an accepted sequence; reports exhaustion when the budget ran
    /// out with fail-after-max-attempts configured
    fn on_complete(&mut self) -> Result<(), RetriesExhausted>;
}

/// Execute `action` under retry supervision
///
/// The action is a factory invoked once per attempt. Returns immediately
/// with a pending [`Execution`]; attempts and backoff waits run on a spawned
/// task. Must be called within a Tokio runtime.
pub fn execute<P, F, Fut, T, E>(policy: Arc<P>, mut action: F) -> Execution<T, GateError<E>>
where
    P: RetryPolicy<T, E> + ?Sized + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (completion, execution) = Completion::new();
    let name = policy.name().to_string();
    let mut context = policy.new_attempt_context();

    tokio::spawn(async move {
        let mut attempt: u32 = 1;
        loop {
            let next_delay = match action().await {
                Ok(value) => match context.on_result(&value) {
                    None => {
                        match context.on_complete() {
                            Ok(()) => completion.try_complete(value),
                            Err(exhausted) => {
                                completion.try_fail(GateError::RetriesExhausted(exhausted))
                            }
                        };
                        return;
                    }
                    Some(delay) => delay,
                },
                Err(error) => match context.on_error(&error) {
                    None => {
                        completion.try_fail(GateError::Execution(error));
                        return;
                    }
                    Some(delay) => delay,
                },
            };

            debug!(
                retry = name.as_str(),
                attempt,
                delay_ms = next_delay.as_millis() as u64,
                "attempt did not settle, scheduling retry"
            );
            attempt += 1;
            tokio::time::sleep(next_delay).await;
        }
    });

    execution
}

/// Wrap a reusable action so every call goes through [`execute`]
///
/// The action must be `Clone` because each invocation moves one copy onto
/// the supervising task.
pub fn decorate<P, F, Fut, T, E>(
    policy: Arc<P>,
    action: F,
) -> impl FnMut() -> Execution<T, GateError<E>>
where
    P: RetryPolicy<T, E> + ?Sized + 'static,
    F: FnMut() -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    move || execute(policy.clone(), action.clone())
}

/// Reference retry policy with a bounded attempt budget and
/// `chrono-machines` backoff
///
/// Attempts are counted in total (the first call included). By default every
/// error is retryable, every result is accepted, and exhaustion completes
/// with the last outcome rather than failing.
pub struct BackoffRetry<T, E> {
    name: String,
    max_attempts: u32,
    fail_after_max_attempts: bool,
    base_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    jitter_factor: f64,
    retry_on_result: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    retry_on_error: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
}

impl<T, E> BackoffRetry<T, E> {
    /// Create a new retry policy builder
    pub fn builder(name: impl Into<String>) -> RetryBuilder<T, E> {
        RetryBuilder::new(name)
    }
}

impl<T, E> std::fmt::Debug for BackoffRetry<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffRetry")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("fail_after_max_attempts", &self.fail_after_max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("multiplier", &self.multiplier)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter_factor", &self.jitter_factor)
            .field("retry_on_result", &self.retry_on_result.is_some())
            .field("retry_on_error", &self.retry_on_error.is_some())
            .finish()
    }
}

impl<T: 'static, E: 'static> RetryPolicy<T, E> for BackoffRetry<T, E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_attempt_context(&self) -> Box<dyn AttemptContext<T, E>> {
        Box::new(BackoffAttempt {
            name: self.name.clone(),
            max_attempts: self.max_attempts,
            fail_after_max_attempts: self.fail_after_max_attempts,
            base_delay_ms: self.base_delay_ms,
            multiplier: self.multiplier,
            max_delay_ms: self.max_delay_ms,
            jitter_factor: self.jitter_factor,
            retry_on_result: self.retry_on_result.clone(),
            retry_on_error: self.retry_on_error.clone(),
            attempts: 0,
            exhausted_on_result: false,
        })
    }
}

struct BackoffAttempt<T, E> {
    name: String,
    max_attempts: u32,
    fail_after_max_attempts: bool,
    base_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    jitter_factor: f64,
    retry_on_result: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    retry_on_error: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
    /// Completed attempts so far
    attempts: u32,
    /// The budget ran out while the result still matched the retry predicate
    exhausted_on_result: bool,
}

impl<T, E> BackoffAttempt<T, E> {
    fn backoff_delay(&self) -> Duration {
        let policy = chrono_machines::Policy {
            max_attempts: self.max_attempts as _,
            base_delay_ms: self.base_delay_ms,
            multiplier: self.multiplier,
            max_delay_ms: self.max_delay_ms,
        };
        Duration::from_millis(policy.calculate_delay(self.attempts as _, self.jitter_factor) as u64)
    }
}

impl<T, E> AttemptContext<T, E> for BackoffAttempt<T, E> {
    fn on_result(&mut self, value: &T) -> Option<Duration> {
        self.attempts += 1;
        let wants_retry = self
            .retry_on_result
            .as_ref()
            .map(|matches| matches(value))
            .unwrap_or(false);
        if !wants_retry {
            return None;
        }
        if self.attempts < self.max_attempts {
            Some(self.backoff_delay())
        } else {
            self.exhausted_on_result = true;
            None
        }
    }

    fn on_error(&mut self, error: &E) -> Option<Duration> {
        self.attempts += 1;
        let retryable = self
            .retry_on_error
            .as_ref()
            .map(|matches| matches(error))
            .unwrap_or(true);
        if retryable && self.attempts < self.max_attempts {
            Some(self.backoff_delay())
        } else {
            None
        }
    }

    fn on_complete(&mut self) -> Result<(), RetriesExhausted> {
        if self.fail_after_max_attempts && self.exhausted_on_result {
            Err(RetriesExhausted {
                name: self.name.clone(),
                attempts: self.attempts,
            })
        } else {
            Ok(())
        }
    }
}

/// Fluent builder for [`BackoffRetry`]
pub struct RetryBuilder<T, E> {
    name: String,
    max_attempts: u32,
    fail_after_max_attempts: bool,
    base_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    jitter_factor: f64,
    retry_on_result: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    retry_on_error: Option<Arc<dyn Fn(&E) -> bool + Send + Sync>>,
}

impl<T, E> RetryBuilder<T, E> {
    /// Create a builder with the defaults: 3 attempts, fixed 500ms delay,
    /// no jitter, retry on every error, accept every result
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_attempts: 3,
            fail_after_max_attempts: false,
            base_delay_ms: 500,
            multiplier: 1.0,
            max_delay_ms: 500,
            jitter_factor: 0.0,
            retry_on_result: None,
            retry_on_error: None,
        }
    }

    /// Set the total attempt budget, first call included
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Wait the same delay before every retry
    pub fn fixed_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self.multiplier = 1.0;
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Grow the delay by `multiplier` per attempt, capped at `max`
    pub fn exponential_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.base_delay_ms = initial.as_millis() as u64;
        self.multiplier = multiplier;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Set the jitter factor (0.0 = none, 1.0 = full jitter)
    /// Uses the chrono-machines formula: delay * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Fail with [`RetriesExhausted`] when the budget runs out while the
    /// result still matches the retry predicate
    pub fn fail_after_max_attempts(mut self) -> Self {
        self.fail_after_max_attempts = true;
        self
    }

    /// Retry when a successful result matches the predicate
    pub fn retry_on_result<Pred>(mut self, predicate: Pred) -> Self
    where
        Pred: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.retry_on_result = Some(Arc::new(predicate));
        self
    }

    /// Retry only errors matching the predicate (default: every error)
    pub fn retry_on_error<Pred>(mut self, predicate: Pred) -> Self
    where
        Pred: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_on_error = Some(Arc::new(predicate));
        self
    }

    /// Build the retry policy
    pub fn build(self) -> BackoffRetry<T, E> {
        BackoffRetry {
            name: self.name,
            max_attempts: self.max_attempts,
            fail_after_max_attempts: self.fail_after_max_attempts,
            base_delay_ms: self.base_delay_ms,
            multiplier: self.multiplier,
            max_delay_ms: self.max_delay_ms,
            jitter_factor: self.jitter_factor,
            retry_on_result: self.retry_on_result,
            retry_on_error: self.retry_on_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{self, CircuitBreakerPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::yield_now;
    use tokio::time::advance;

    #[derive(Debug, PartialEq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    type ActionFuture = std::pin::Pin<Box<dyn Future<Output = Result<String, TestError>> + Send>>;

    /// Counts how many attempts the orchestrator actually ran.
    fn counting_action(
        counter: Arc<AtomicUsize>,
        fail_first: usize,
    ) -> impl FnMut() -> ActionFuture + Send + 'static {
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < fail_first {
                    Err(TestError("not yet"))
                } else {
                    Ok("Hello world".to_string())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_accepted_first_result_invokes_action_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = Arc::new(BackoffRetry::builder("id").max_attempts(3).build());

        let result = execute(policy, counting_action(calls.clone(), 0)).await;

        assert_eq!(result.unwrap(), "Hello world");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_errors_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = Arc::new(
            BackoffRetry::builder("id")
                .max_attempts(3)
                .fixed_delay(Duration::from_millis(100))
                .build(),
        );

        let result = execute(policy, counting_action(calls.clone(), 2)).await;

        assert_eq!(result.unwrap(), "Hello world");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_propagates_when_budget_is_spent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = Arc::new(
            BackoffRetry::builder("id")
                .max_attempts(3)
                .fixed_delay(Duration::from_millis(100))
                .build(),
        );

        let result = execute(policy, counting_action(calls.clone(), 100)).await;

        match result {
            Err(GateError::Execution(e)) => assert_eq!(e, TestError("not yet")),
            other => panic!("Expected the attempt error, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unretryable_error_stops_after_one_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = Arc::new(
            BackoffRetry::builder("id")
                .max_attempts(5)
                .retry_on_error(|e: &TestError| e.0 != "not yet")
                .build(),
        );

        let result = execute(policy, counting_action(calls.clone(), 100)).await;

        assert!(matches!(result, Err(GateError::Execution(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_result_retries_then_accepts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = Arc::new(
            BackoffRetry::builder("id")
                .max_attempts(2)
                .fixed_delay(Duration::from_millis(10))
                .retry_on_result(|s: &String| s.contains("Hello world"))
                .build(),
        );

        let result = execute(policy, counting_action(calls.clone(), 0)).await;

        // Budget spent without fail-after-max: the last result is accepted.
        assert_eq!(result.unwrap(), "Hello world");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_after_max_attempts_surfaces_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = Arc::new(
            BackoffRetry::builder("retry")
                .max_attempts(3)
                .fixed_delay(Duration::from_millis(10))
                .retry_on_result(|s: &String| s == "Hello world")
                .fail_after_max_attempts()
                .build(),
        );

        let result = execute(policy, counting_action(calls.clone(), 0)).await;

        match result {
            Err(GateError::RetriesExhausted(e)) => {
                assert_eq!(e.name, "retry");
                assert_eq!(e.attempts, 3);
                assert_eq!(
                    e.to_string(),
                    "Retry 'retry' has exhausted all attempts (3)"
                );
            }
            other => panic!("Expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_matching_result_accepted_with_single_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = Arc::new(
            BackoffRetry::builder("id")
                .max_attempts(1)
                .retry_on_result(|s: &String| s.contains("NoRetry"))
                .build(),
        );

        let result = execute(policy, counting_action(calls.clone(), 0)).await;

        assert_eq!(result.unwrap(), "Hello world");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct ScriptedRetry {
        delays: Vec<Option<Duration>>,
        contexts: AtomicUsize,
    }

    struct ScriptedAttempt {
        delays: std::vec::IntoIter<Option<Duration>>,
    }

    impl<T, E> RetryPolicy<T, E> for ScriptedRetry {
        fn name(&self) -> &str {
            "scripted"
        }

        fn new_attempt_context(&self) -> Box<dyn AttemptContext<T, E>> {
            self.contexts.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptedAttempt {
                delays: self.delays.clone().into_iter(),
            })
        }
    }

    impl<T, E> AttemptContext<T, E> for ScriptedAttempt {
        fn on_result(&mut self, _value: &T) -> Option<Duration> {
            None
        }

        fn on_error(&mut self, _error: &E) -> Option<Duration> {
            self.delays.next().flatten()
        }

        fn on_complete(&mut self) -> Result<(), RetriesExhausted> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_each_invocation_mints_a_fresh_context() {
        let policy = Arc::new(ScriptedRetry {
            delays: vec![],
            contexts: AtomicUsize::new(0),
        });

        let _ = execute(policy.clone(), || async { Ok::<_, TestError>(1) }).await;
        let _ = execute(policy.clone(), || async { Ok::<_, TestError>(2) }).await;

        assert_eq!(policy.contexts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_wait_is_driven_by_the_timer() {
        let policy = Arc::new(ScriptedRetry {
            delays: vec![Some(Duration::from_millis(200))],
            contexts: AtomicUsize::new(0),
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let execution = execute(policy, counting_action(calls.clone(), 1));

        yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_millis(199)).await;
        yield_now().await;
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "second attempt must wait out the backoff delay"
        );

        advance(Duration::from_millis(1)).await;
        yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(execution.await.unwrap(), "Hello world");
    }

    struct PermissiveBreaker {
        successes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl<T, E> CircuitBreakerPolicy<T, E> for PermissiveBreaker {
        fn name(&self) -> &str {
            "inner"
        }

        fn try_acquire_permission(&self) -> bool {
            true
        }

        fn on_success(&self, _elapsed: Duration, _value: &T) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _elapsed: Duration, _error: &E) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_composes_around_the_circuit_gate() {
        let breaker = Arc::new(PermissiveBreaker {
            successes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        });
        let retry = Arc::new(
            BackoffRetry::builder("outer")
                .max_attempts(3)
                .fixed_delay(Duration::from_millis(50))
                .build(),
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_breaker = breaker.clone();
        let probe = calls.clone();
        let result = execute(retry, move || {
            let breaker = inner_breaker.clone();
            let calls = probe.clone();
            circuit::execute(breaker, move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError("warming up"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.successes.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.errors.load(Ordering::SeqCst), 2);
    }
}
