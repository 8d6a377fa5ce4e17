//! Error types for gate operations

use std::error::Error;
use std::fmt;

/// Raised by a retry policy when the attempt budget ran out while the
/// result still matched the retry predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetriesExhausted {
    pub name: String,
    pub attempts: u32,
}

impl fmt::Display for RetriesExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Retry '{}' has exhausted all attempts ({})",
            self.name, self.attempts
        )
    }
}

impl Error for RetriesExhausted {}

/// Errors that can resolve a gated execution
#[derive(Debug)]
pub enum GateError<E = Box<dyn Error + Send + Sync>> {
    /// Circuit breaker denied permission, the action was never invoked
    CallNotPermitted { name: String },
    /// Bulkhead is at capacity, no concurrency slot was taken
    BulkheadFull { name: String },
    /// Rate limiter rejected the permit reservation
    RequestNotPermitted { name: String },
    /// Caller asked to reserve zero permits; the policy was not consulted
    ZeroPermits { name: String },
    /// The timeout timer won the completion race
    Timeout { name: String },
    /// Retry budget ran out with fail-after-max-attempts configured
    RetriesExhausted(RetriesExhausted),
    /// The wrapped action failed
    Execution(E),
}

impl<E: fmt::Display> fmt::Display for GateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::CallNotPermitted { name } => {
                write!(f, "Circuit breaker '{}' does not permit a call", name)
            }
            GateError::BulkheadFull { name } => {
                write!(f, "Bulkhead '{}' is full and does not permit a call", name)
            }
            GateError::RequestNotPermitted { name } => {
                write!(f, "Rate limiter '{}' does not permit a call", name)
            }
            GateError::ZeroPermits { name } => {
                write!(f, "Rate limiter '{}' requires at least one permit", name)
            }
            GateError::Timeout { name } => {
                write!(f, "Time limiter '{}' recorded a timeout", name)
            }
            GateError::RetriesExhausted(e) => write!(f, "{}", e),
            GateError::Execution(e) => write!(f, "Execution failed: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for GateError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GateError::Execution(e) => Some(e),
            GateError::RetriesExhausted(e) => Some(e),
            _ => None,
        }
    }
}
