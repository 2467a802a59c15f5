use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use tokio::sync::RwLock;

use crate::{
    Result, SagaState, SagaStatus,
    store::{SagaStateStore, StateMutator},
};

/// In-memory saga state store, the reference implementation.
///
/// Records are kept in a concurrent map keyed by saga ID and returned as
/// deep copies, so callers can mutate a returned snapshot without
/// corrupting stored state. Per-record mutation is serialized under the
/// map's write lock. This implementation provides the same interface as
/// the PostgreSQL store.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<SagaId, SagaState>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of saga records stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Clears all saga records.
    pub async fn clear(&self) {
        self.sagas.write().await.clear();
    }
}

#[async_trait]
impl SagaStateStore for InMemorySagaStore {
    async fn save(&self, mut state: SagaState) -> Result<()> {
        let mut sagas = self.sagas.write().await;
        state.last_updated_at = Utc::now();
        state.version += 1;
        sagas.insert(state.saga_id, state);
        Ok(())
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        let sagas = self.sagas.read().await;
        Ok(sagas.get(&saga_id).cloned())
    }

    async fn update(&self, saga_id: SagaId, mutator: StateMutator) -> Result<Option<SagaState>> {
        let mut sagas = self.sagas.write().await;
        match sagas.get_mut(&saga_id) {
            Some(state) => {
                mutator(state);
                state.last_updated_at = Utc::now();
                state.version += 1;
                Ok(Some(state.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, saga_id: SagaId) -> Result<bool> {
        let mut sagas = self.sagas.write().await;
        Ok(sagas.remove(&saga_id).is_some())
    }

    async fn get_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        let sagas = self.sagas.read().await;
        Ok(sagas
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn get_pending_compensations(&self) -> Result<Vec<SagaState>> {
        self.get_by_status(SagaStatus::Failed).await
    }

    async fn get_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>> {
        let sagas = self.sagas.read().await;
        Ok(sagas
            .values()
            .filter(|s| s.status == SagaStatus::Running && s.has_timed_out(now))
            .cloned()
            .collect())
    }

    async fn get_ready_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>> {
        let sagas = self.sagas.read().await;
        Ok(sagas
            .values()
            .filter(|s| {
                s.status == SagaStatus::Suspended
                    && s.next_retry_at.is_some_and(|at| at <= now)
                    && s.can_schedule_retry()
            })
            .cloned()
            .collect())
    }

    async fn get_expired(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>> {
        let sagas = self.sagas.read().await;
        Ok(sagas
            .values()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect())
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut sagas = self.sagas.write().await;
        let before = sagas.len();
        sagas.retain(|_, s| {
            !(s.status.is_cleanable() && s.completed_at.is_some_and(|at| at < older_than))
        });
        Ok((before - sagas.len()) as u64)
    }
}
