use common::SagaId;
use thiserror::Error;

/// Errors that can occur when interacting with the saga state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The saga record was not found in the store.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// An optimistic concurrency check failed when writing a record.
    /// The expected revision did not match the stored revision.
    #[error("Concurrency conflict for saga {saga_id}: expected revision {expected}, found {actual}")]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: u64,
        actual: u64,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored status column held an unrecognized value.
    #[error("Corrupt status column: {0}")]
    InvalidStatus(#[from] crate::status::ParseSagaStatusError),
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, StateStoreError>;
