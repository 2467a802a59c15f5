//! The persisted snapshot of a saga instance.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::status::SagaStatus;

/// One entry in a saga's error trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaFault {
    /// The step the error occurred on, if known.
    pub step: Option<String>,
    /// Human-readable error message.
    pub message: String,
    /// When the error was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl SagaFault {
    /// Creates a fault entry stamped with the current time.
    pub fn new(step: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            step: step.map(str::to_string),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// The durable record of one saga instance.
///
/// This is the complete state needed to resume a saga after a process
/// restart: identity, status, step pointer, opaque payload, timing and
/// retry bookkeeping, and the error trails. Mutated only through the
/// orchestrator and the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaState {
    /// Unique identifier; immutable once created.
    pub saga_id: SagaId,

    /// Name used to resolve which saga implementation owns this state
    /// on resume.
    pub saga_type: String,

    /// Current lifecycle status.
    pub status: SagaStatus,

    /// Index of the step the saga is on or last touched.
    pub current_step_index: usize,

    /// Name of the step the saga is on or last touched.
    pub current_step_name: Option<String>,

    /// Opaque business data in its serialized form.
    pub payload: serde_json::Value,

    /// When the saga was created.
    pub started_at: DateTime<Utc>,

    /// Refreshed by every store mutation.
    pub last_updated_at: DateTime<Utc>,

    /// Set exactly once, on entering a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Bound on total running time from `started_at`, in milliseconds.
    pub timeout_ms: Option<i64>,

    /// Bound on how long this record may be retained before cleanup.
    pub expires_at: Option<DateTime<Utc>>,

    /// Ordered names of steps that executed successfully. This is the
    /// compensation work list.
    pub executed_steps: Vec<String>,

    /// Append-only trail of execution errors.
    pub errors: Vec<SagaFault>,

    /// Append-only trail of compensation errors.
    pub compensation_errors: Vec<SagaFault>,

    /// Number of retries attempted so far.
    pub retry_count: u32,

    /// Retry budget.
    pub max_retries: u32,

    /// When the next retry becomes due, while `Suspended`.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Caller-supplied tracing context, opaque to the engine.
    pub correlation_id: Option<String>,

    /// Caller-supplied metadata, opaque to the engine.
    pub metadata: HashMap<String, serde_json::Value>,

    /// Monotonic revision, bumped by every store mutation. Used for
    /// optimistic concurrency control in durable stores.
    pub version: u64,
}

impl SagaState {
    /// Creates a fresh record for a saga that has not started yet.
    pub fn new(saga_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            saga_id: SagaId::new(),
            saga_type: saga_type.into(),
            status: SagaStatus::NotStarted,
            current_step_index: 0,
            current_step_name: None,
            payload,
            started_at: now,
            last_updated_at: now,
            completed_at: None,
            timeout_ms: None,
            expires_at: None,
            executed_steps: Vec::new(),
            errors: Vec::new(),
            compensation_errors: Vec::new(),
            retry_count: 0,
            max_retries: 0,
            next_retry_at: None,
            correlation_id: None,
            metadata: HashMap::new(),
            version: 0,
        }
    }

    /// Returns the running-time bound, if one was configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::milliseconds)
    }

    /// Sets the running-time bound.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout_ms = Some(timeout.num_milliseconds());
    }

    /// Returns true if total running time has exceeded the timeout.
    pub fn has_timed_out(&self, now: DateTime<Utc>) -> bool {
        match self.timeout() {
            Some(timeout) => now > self.started_at + timeout,
            None => false,
        }
    }

    /// Returns true if the retention deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }

    /// Returns true if another retry fits within the budget.
    pub fn can_schedule_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Appends an execution error to the trail.
    pub fn record_error(&mut self, step: Option<&str>, message: impl Into<String>) {
        self.errors.push(SagaFault::new(step, message));
    }

    /// Appends a compensation error to the trail.
    pub fn record_compensation_error(&mut self, step: &str, message: impl Into<String>) {
        self.compensation_errors
            .push(SagaFault::new(Some(step), message));
    }

    /// Marks a step as about to execute.
    pub fn begin_step(&mut self, step_name: &str) {
        self.current_step_name = Some(step_name.to_string());
    }

    /// Records a successful step execution: appends to `executed_steps`,
    /// advances the step pointer, and captures the payload as of the
    /// step boundary.
    pub fn record_step_completed(&mut self, step_name: &str, payload: serde_json::Value) {
        self.executed_steps.push(step_name.to_string());
        self.current_step_index += 1;
        self.current_step_name = Some(step_name.to_string());
        self.payload = payload;
    }

    /// Transitions to `Running`, clearing any pending retry schedule.
    pub fn mark_running(&mut self) {
        self.status = SagaStatus::Running;
        self.next_retry_at = None;
    }

    /// Transitions to `Suspended` with a scheduled retry time.
    pub fn schedule_retry(&mut self, next_retry_at: DateTime<Utc>) {
        self.status = SagaStatus::Suspended;
        self.next_retry_at = Some(next_retry_at);
    }

    /// Transitions to `Failed`.
    pub fn mark_failed(&mut self) {
        self.status = SagaStatus::Failed;
    }

    /// Transitions to `Compensating`.
    pub fn mark_compensating(&mut self) {
        self.status = SagaStatus::Compensating;
    }

    /// Enters a terminal status, setting `completed_at` if it has not
    /// been set before.
    pub fn enter_terminal(&mut self, status: SagaStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}
