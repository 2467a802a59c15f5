use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, SagaState, SagaStatus, StateStoreError,
    state::SagaFault,
    store::{SagaStateStore, StateMutator},
};

/// How many times `update` re-applies the mutation after a conflicting
/// concurrent write before giving up.
const UPDATE_ATTEMPTS: u32 = 3;

/// PostgreSQL-backed saga state store.
///
/// Per-record atomicity is enforced with a compare-and-swap on the
/// `version` column: a writer that loses the race re-reads the record and
/// re-applies its mutation, so two concurrent resume/retry callers cannot
/// both land a stale write.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga state store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_state(row: PgRow) -> Result<SagaState> {
        let status: String = row.try_get("status")?;
        let status: SagaStatus = status.parse().map_err(StateStoreError::InvalidStatus)?;

        let executed_steps: Vec<String> = serde_json::from_value(row.try_get("executed_steps")?)?;
        let errors: Vec<SagaFault> = serde_json::from_value(row.try_get("errors")?)?;
        let compensation_errors: Vec<SagaFault> =
            serde_json::from_value(row.try_get("compensation_errors")?)?;
        let metadata: HashMap<String, serde_json::Value> =
            serde_json::from_value(row.try_get("metadata")?)?;

        Ok(SagaState {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            saga_type: row.try_get("saga_type")?,
            status,
            current_step_index: row.try_get::<i64, _>("current_step_index")? as usize,
            current_step_name: row.try_get("current_step_name")?,
            payload: row.try_get("payload")?,
            started_at: row.try_get("started_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
            completed_at: row.try_get("completed_at")?,
            timeout_ms: row.try_get("timeout_ms")?,
            expires_at: row.try_get("expires_at")?,
            executed_steps,
            errors,
            compensation_errors,
            retry_count: row.try_get::<i64, _>("retry_count")? as u32,
            max_retries: row.try_get::<i64, _>("max_retries")? as u32,
            next_retry_at: row.try_get("next_retry_at")?,
            correlation_id: row.try_get("correlation_id")?,
            metadata,
            version: row.try_get::<i64, _>("version")? as u64,
        })
    }

    async fn fetch_where(&self, predicate: &str, now: Option<DateTime<Utc>>) -> Result<Vec<SagaState>> {
        let sql = format!("SELECT * FROM saga_states WHERE {predicate}");
        let mut query = sqlx::query(&sql);
        if let Some(now) = now {
            query = query.bind(now);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_state).collect()
    }

    /// Writes the record back if its stored revision still matches
    /// `expected`. Returns true if the write landed.
    async fn write_versioned(&self, state: &SagaState, expected: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE saga_states SET
                status = $2,
                current_step_index = $3,
                current_step_name = $4,
                payload = $5,
                last_updated_at = $6,
                completed_at = $7,
                timeout_ms = $8,
                expires_at = $9,
                executed_steps = $10,
                errors = $11,
                compensation_errors = $12,
                retry_count = $13,
                max_retries = $14,
                next_retry_at = $15,
                correlation_id = $16,
                metadata = $17,
                version = $18
            WHERE saga_id = $1 AND version = $19
            "#,
        )
        .bind(state.saga_id.as_uuid())
        .bind(state.status.as_str())
        .bind(state.current_step_index as i64)
        .bind(&state.current_step_name)
        .bind(&state.payload)
        .bind(state.last_updated_at)
        .bind(state.completed_at)
        .bind(state.timeout_ms)
        .bind(state.expires_at)
        .bind(serde_json::to_value(&state.executed_steps)?)
        .bind(serde_json::to_value(&state.errors)?)
        .bind(serde_json::to_value(&state.compensation_errors)?)
        .bind(state.retry_count as i64)
        .bind(state.max_retries as i64)
        .bind(state.next_retry_at)
        .bind(&state.correlation_id)
        .bind(serde_json::to_value(&state.metadata)?)
        .bind(state.version as i64)
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SagaStateStore for PostgresSagaStore {
    async fn save(&self, mut state: SagaState) -> Result<()> {
        state.last_updated_at = Utc::now();
        state.version += 1;

        sqlx::query(
            r#"
            INSERT INTO saga_states (
                saga_id, saga_type, status, current_step_index, current_step_name,
                payload, started_at, last_updated_at, completed_at, timeout_ms,
                expires_at, executed_steps, errors, compensation_errors,
                retry_count, max_retries, next_retry_at, correlation_id, metadata, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (saga_id) DO UPDATE SET
                saga_type = EXCLUDED.saga_type,
                status = EXCLUDED.status,
                current_step_index = EXCLUDED.current_step_index,
                current_step_name = EXCLUDED.current_step_name,
                payload = EXCLUDED.payload,
                last_updated_at = EXCLUDED.last_updated_at,
                completed_at = EXCLUDED.completed_at,
                timeout_ms = EXCLUDED.timeout_ms,
                expires_at = EXCLUDED.expires_at,
                executed_steps = EXCLUDED.executed_steps,
                errors = EXCLUDED.errors,
                compensation_errors = EXCLUDED.compensation_errors,
                retry_count = EXCLUDED.retry_count,
                max_retries = EXCLUDED.max_retries,
                next_retry_at = EXCLUDED.next_retry_at,
                correlation_id = EXCLUDED.correlation_id,
                metadata = EXCLUDED.metadata,
                version = saga_states.version + 1
            "#,
        )
        .bind(state.saga_id.as_uuid())
        .bind(&state.saga_type)
        .bind(state.status.as_str())
        .bind(state.current_step_index as i64)
        .bind(&state.current_step_name)
        .bind(&state.payload)
        .bind(state.started_at)
        .bind(state.last_updated_at)
        .bind(state.completed_at)
        .bind(state.timeout_ms)
        .bind(state.expires_at)
        .bind(serde_json::to_value(&state.executed_steps)?)
        .bind(serde_json::to_value(&state.errors)?)
        .bind(serde_json::to_value(&state.compensation_errors)?)
        .bind(state.retry_count as i64)
        .bind(state.max_retries as i64)
        .bind(state.next_retry_at)
        .bind(&state.correlation_id)
        .bind(serde_json::to_value(&state.metadata)?)
        .bind(state.version as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaState>> {
        let row = sqlx::query("SELECT * FROM saga_states WHERE saga_id = $1")
            .bind(saga_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_state).transpose()
    }

    async fn update(&self, saga_id: SagaId, mutator: StateMutator) -> Result<Option<SagaState>> {
        let mut last_seen = 0u64;

        for _ in 0..UPDATE_ATTEMPTS {
            let Some(mut state) = self.get(saga_id).await? else {
                return Ok(None);
            };
            let expected = state.version;
            last_seen = expected;

            mutator(&mut state);
            state.last_updated_at = Utc::now();
            state.version = expected + 1;

            if self.write_versioned(&state, expected).await? {
                return Ok(Some(state));
            }
            // Lost the race; re-read and re-apply.
        }

        let actual = self.get(saga_id).await?.map(|s| s.version).unwrap_or(0);
        Err(StateStoreError::ConcurrencyConflict {
            saga_id,
            expected: last_seen,
            actual,
        })
    }

    async fn delete(&self, saga_id: SagaId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saga_states WHERE saga_id = $1")
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        let rows = sqlx::query("SELECT * FROM saga_states WHERE status = $1")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_state).collect()
    }

    async fn get_pending_compensations(&self) -> Result<Vec<SagaState>> {
        self.get_by_status(SagaStatus::Failed).await
    }

    async fn get_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>> {
        self.fetch_where(
            "status = 'Running' AND timeout_ms IS NOT NULL \
             AND started_at + (timeout_ms * interval '1 millisecond') < $1",
            Some(now),
        )
        .await
    }

    async fn get_ready_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>> {
        self.fetch_where(
            "status = 'Suspended' AND next_retry_at IS NOT NULL \
             AND next_retry_at <= $1 AND retry_count < max_retries",
            Some(now),
        )
        .await
    }

    async fn get_expired(&self, now: DateTime<Utc>) -> Result<Vec<SagaState>> {
        self.fetch_where("expires_at IS NOT NULL AND expires_at <= $1", Some(now))
            .await
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM saga_states \
             WHERE status IN ('Completed', 'Compensated') \
             AND completed_at IS NOT NULL AND completed_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
