use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;

use crate::{Result, SagaState, SagaStatus};

/// A caller-supplied mutation applied atomically to a single saga record.
///
/// `Fn` rather than `FnOnce`: a store using optimistic concurrency control
/// may re-apply the mutation to a fresh snapshot after a conflicting write.
pub type StateMutator = Box<dyn Fn(&mut SagaState) + Send>;

/// Core trait for saga state store implementations.
///
/// A state store persists the durable snapshot of each saga instance.
/// Every mutation must be atomic with respect to the single saga record:
/// no partial writes may be visible to other readers. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStateStore: Send + Sync {
    /// Creates or overwrites a saga record.
    ///
    /// Refreshes `last_updated_at` and bumps the revision. Safe under
    /// concurrent calls for different saga IDs.
    async fn save(&self, state: SagaState) -> Result<()>;

    /// Retrieves a saga record by ID.
    ///
    /// Returns a snapshot the caller may mutate freely; changes are not
    /// visible to the store until written back through `save` or `update`.
    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaState>>;

    /// Reads a record, applies the mutation, and writes it back.
    ///
    /// Always refreshes `last_updated_at` and bumps the revision. Returns
    /// the post-mutation snapshot, or `None` (a no-op) if the ID does not
    /// exist; callers that require existence should `get` first.
    async fn update(&self, saga_id: SagaId, mutator: StateMutator) -> Result<Option<SagaState>>;

    /// Deletes a saga record. Returns true if a record was removed.
    async fn delete(&self, saga_id: SagaId) -> Result<bool>;

    /// Retrieves all sagas with the given status.
    async fn get_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>>;

    /// Retrieves sagas awaiting compensation (status `Failed`).
    async fn get_pending_compensations(&self) -> Result<Vec<SagaState>>;

    /// Retrieves `Running` sagas whose total running time has exceeded
    /// their timeout as of `now`.
    async fn get_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>>;

    /// Retrieves `Suspended` sagas whose scheduled retry is due as of
    /// `now` and whose retry budget is not exhausted.
    async fn get_ready_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>>;

    /// Retrieves sagas whose retention deadline has passed as of `now`.
    async fn get_expired(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>>;

    /// Deletes terminal (`Completed`/`Compensated`) records whose
    /// `completed_at` is older than the cutoff. Returns the count deleted.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64>;
}
