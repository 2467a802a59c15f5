//! Per-execution options and the ephemeral result of orchestrator calls.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use common::SagaId;
use state_store::SagaStatus;

/// Caller-supplied options for one saga execution.
#[derive(Debug, Clone)]
pub struct SagaExecutionOptions {
    /// Caller-supplied tracing identifier, opaque to the engine.
    pub correlation_id: Option<String>,

    /// Bound on total running time from the saga's start.
    pub timeout: Option<Duration>,

    /// Retry budget for suspended sagas.
    pub max_retries: u32,

    /// Retention deadline after which the record may be cleaned up.
    pub expires_at: Option<DateTime<Utc>>,

    /// Whether to persist state to the store. Disabling this makes the
    /// saga fire-and-forget: it cannot be resumed, retried, or swept.
    pub persist_state: bool,

    /// Caller-supplied metadata, opaque to the engine.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for SagaExecutionOptions {
    fn default() -> Self {
        Self {
            correlation_id: None,
            timeout: None,
            max_retries: 3,
            expires_at: None,
            persist_state: true,
            metadata: HashMap::new(),
        }
    }
}

impl SagaExecutionOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the running-time bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the retention deadline.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Disables persistence for this execution.
    pub fn without_persistence(mut self) -> Self {
        self.persist_state = false;
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Outcome of one orchestrator call.
///
/// Derived from the saga's state at the end of the operation; never
/// persisted.
#[derive(Debug)]
pub struct SagaReport<D> {
    /// The saga this report describes.
    pub saga_id: SagaId,

    /// True only when the operation left the saga in its happy-path
    /// status (`Completed` for execution, `Compensated` for
    /// compensation).
    pub success: bool,

    /// Final status as of the end of the operation.
    pub status: SagaStatus,

    /// Snapshot of the payload, when it deserializes to the caller's
    /// data type.
    pub data: Option<D>,

    /// Message of the most recent recorded error, if any.
    pub error: Option<String>,
}
