//! Saga error taxonomy.

use common::SagaId;
use state_store::{SagaStatus, StateStoreError};
use thiserror::Error;

/// Errors surfaced by saga orchestration.
///
/// Business-process failures are caught at the saga-execution boundary
/// and converted into status transitions plus reports: a failed step
/// ends in `Failed`/`Compensated`, a failed compensation in
/// `PartiallyCompensated`, an exceeded timeout in `TimedOut`, an
/// exhausted retry budget in `Failed` — each with a fault appended to
/// the record's error trail. They never reach callers as `Err`. The
/// variants below indicate structural misuse or infrastructure faults,
/// and every one carries a stable error code.
#[derive(Debug, Error)]
pub enum SagaError {
    /// An operation referenced an unknown saga ID.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// An operation was attempted from a status that does not permit it.
    #[error("Saga {saga_id}: cannot {operation} from status {status}")]
    InvalidState {
        saga_id: SagaId,
        operation: &'static str,
        status: SagaStatus,
    },

    /// No saga implementation is registered under the stored type name.
    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    /// A persisted record's saga type does not match the requested one.
    #[error("Saga {saga_id}: expected type '{expected}', found '{actual}'")]
    TypeMismatch {
        saga_id: SagaId,
        expected: String,
        actual: String,
    },

    /// The payload could not be (de)serialized for its saga's data type.
    #[error("Payload serialization error: {0}")]
    PayloadSerialization(#[from] serde_json::Error),

    /// State store error.
    #[error("State store error: {0}")]
    Store(#[from] StateStoreError),
}

impl SagaError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SagaError::NotFound(_) => "SAGA_NOT_FOUND",
            SagaError::InvalidState { .. } => "SAGA_INVALID_STATE",
            SagaError::UnknownSagaType(_) => "SAGA_UNKNOWN_TYPE",
            SagaError::TypeMismatch { .. } => "SAGA_TYPE_MISMATCH",
            SagaError::PayloadSerialization(_) => "SAGA_PAYLOAD_SERIALIZATION",
            SagaError::Store(_) => "SAGA_STORE",
        }
    }
}

/// Convenience type alias for orchestration results.
pub type Result<T> = std::result::Result<T, SagaError>;
