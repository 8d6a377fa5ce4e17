//! GateMachines - non-blocking resilience gates for async operations
//!
//! This crate runs a caller-supplied async action exactly once per
//! invocation under one of five admission/failure-handling disciplines:
//! - Circuit breaking: gate execution on permission, account the outcome
//! - Bulkheading: cap in-flight concurrency, release the slot exactly once
//! - Rate limiting: reserve permits, waiting out admission delays on the
//!   timer instead of a thread
//! - Retrying: re-drive the action under a per-invocation attempt context
//! - Time limiting: race the action against a timeout timer
//!
//! The policy engines themselves (failure statistics, token buckets) stay
//! behind small capability traits; each gate only promises to call them in
//! a valid order, exactly once per attempt. Every gate returns an
//! [`Execution`](completion::Execution) immediately - a write-once handle
//! settled by whichever supervised event wins - and never blocks the
//! calling thread.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use gate_machines::{BackoffRetry, TimeLimiter, retry, time_limit};
//!
//! # async fn fetch_quote() -> Result<String, std::io::Error> { Ok("42".into()) }
//! #[tokio::main]
//! async fn main() {
//!     let retry_policy = Arc::new(
//!         BackoffRetry::builder("quote-api")
//!             .max_attempts(3)
//!             .fixed_delay(Duration::from_millis(200))
//!             .build(),
//!     );
//!     let limiter = Arc::new(TimeLimiter::new("quote-api", Duration::from_secs(2)));
//!
//!     let result = retry::execute(retry_policy, move || {
//!         let limiter = limiter.clone();
//!         time_limit::execute(limiter, || async { fetch_quote().await })
//!     })
//!     .await;
//!
//!     match result {
//!         Ok(quote) => println!("Got: {quote}"),
//!         Err(error) => eprintln!("Failed with: {error}"),
//!     }
//! }
//! ```

pub mod bulkhead;
pub mod circuit;
pub mod completion;
pub mod errors;
pub mod rate_limit;
pub mod retry;
pub mod time_limit;

pub use bulkhead::{Bulkhead, BulkheadPolicy};
pub use circuit::CircuitBreakerPolicy;
pub use completion::{Completion, Execution};
pub use errors::{GateError, RetriesExhausted};
pub use rate_limit::{RateLimiterPolicy, Reservation};
pub use retry::{AttemptContext, BackoffRetry, RetryBuilder, RetryPolicy};
pub use time_limit::{TimeLimiter, TimeLimiterPolicy};
