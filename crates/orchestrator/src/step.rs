//! Saga step contract supplied by saga authors.

use async_trait::async_trait;

/// Error returned by a step's execute or compensate action.
#[derive(Debug, Clone)]
pub struct StepError {
    /// Human-readable failure description.
    pub message: String,
    /// Whether the failure is transient and worth retrying. A retryable
    /// failure suspends the saga for a scheduled retry instead of
    /// triggering immediate compensation, as long as the retry budget
    /// is not exhausted.
    pub retryable: bool,
}

impl StepError {
    /// Creates a fatal step error. The saga compensates immediately.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable step error. The saga suspends and retries
    /// with backoff while budget remains.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StepError {}

/// A unit of work within a saga.
///
/// Steps execute in the order their saga lists them. `compensate` is the
/// best-effort undo paired with `execute` and is required to be
/// idempotent: a crash may cause it to be invoked more than once for the
/// same step.
#[async_trait]
pub trait SagaStep<D>: Send + Sync {
    /// Step name, unique within a saga. Persisted into `executed_steps`
    /// and used to drive compensation after a restart.
    fn name(&self) -> &str;

    /// Whether this step can be undone at all. Non-compensable steps are
    /// skipped during compensation and do not count as failures, but
    /// their presence means the saga can never be fully undone.
    fn can_compensate(&self) -> bool {
        true
    }

    /// Runs the forward action, mutating the payload in place.
    async fn execute(&self, data: &mut D) -> Result<(), StepError>;

    /// Undoes the forward action. Must be idempotent.
    async fn compensate(&self, data: &mut D) -> Result<(), StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_by_default() {
        let err = StepError::new("boom");
        assert!(!err.retryable);
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_retryable_constructor() {
        let err = StepError::retryable("downstream unavailable");
        assert!(err.retryable);
    }
}
