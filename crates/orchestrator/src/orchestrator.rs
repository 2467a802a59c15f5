//! Saga orchestrator: drives sagas through their lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::de::DeserializeOwned;
use state_store::{SagaState, SagaStateStore, SagaStatus};

use crate::error::{Result, SagaError};
use crate::options::{SagaExecutionOptions, SagaReport};
use crate::registry::SagaRegistry;
use crate::retry::RetryPolicy;
use crate::saga::{SagaBehavior, SagaDefinition, StepExecutionError};

/// Orchestrates saga execution, compensation, retries, and cleanup.
///
/// Each operation is an independent asynchronous unit of work; many
/// sagas may run concurrently with no cross-saga locking. Business
/// failures inside steps become status transitions and reports;
/// structural misuse (unknown IDs or types, invalid transitions) is
/// returned as an error.
pub struct SagaOrchestrator<St> {
    store: Arc<St>,
    registry: Arc<SagaRegistry>,
    retry_policy: RetryPolicy,
}

impl<St: SagaStateStore> SagaOrchestrator<St> {
    /// Creates an orchestrator over a state store and a saga registry.
    pub fn new(store: Arc<St>, registry: Arc<SagaRegistry>) -> Self {
        Self {
            store,
            registry,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the default retry backoff policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the state store this orchestrator persists to.
    pub fn store(&self) -> &Arc<St> {
        &self.store
    }

    /// Executes a saga of type `S` from its first step.
    ///
    /// The saga type must be registered. Step failures are converted
    /// into status transitions (suspension for retryable failures with
    /// budget, otherwise failure plus automatic compensation); callers
    /// always get a report from a well-formed call.
    #[tracing::instrument(skip(self, data, options), fields(saga_type = S::saga_type()))]
    pub async fn execute<S: SagaDefinition>(
        &self,
        data: S::Data,
        options: SagaExecutionOptions,
    ) -> Result<SagaReport<S::Data>> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();

        let behavior = self
            .registry
            .resolve(S::saga_type())
            .ok_or_else(|| SagaError::UnknownSagaType(S::saga_type().to_string()))?;

        let payload = serde_json::to_value(&data)?;
        let mut state = SagaState::new(S::saga_type(), payload);
        state.correlation_id = options.correlation_id;
        state.expires_at = options.expires_at;
        state.max_retries = options.max_retries;
        state.metadata = options.metadata;
        if let Some(timeout) = options.timeout {
            state.set_timeout(timeout);
        }
        state.mark_running();

        let persist = options.persist_state;
        if persist {
            self.store.save(state.clone()).await?;
            // Pick up the stored revision so later writes stay monotonic.
            if let Some(stored) = self.store.get(state.saga_id).await? {
                state = stored;
            }
        }

        let saga_id = state.saga_id;
        tracing::info!(%saga_id, "saga started");
        let state = match self.run_forward(&behavior, state, persist).await {
            Ok(state) => state,
            Err(e) => {
                if persist {
                    self.record_abort(saga_id, &e).await;
                }
                return Err(e);
            }
        };

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        Ok(Self::report(&state, SagaStatus::Completed))
    }

    /// Resumes a persisted saga from its current step.
    ///
    /// Valid from `Running` (crash recovery) and `Suspended`.
    #[tracing::instrument(skip(self), fields(saga_type = S::saga_type()))]
    pub async fn resume<S: SagaDefinition>(&self, saga_id: SagaId) -> Result<SagaReport<S::Data>> {
        let state = self
            .store
            .get(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;

        if state.saga_type != S::saga_type() {
            return Err(SagaError::TypeMismatch {
                saga_id,
                expected: S::saga_type().to_string(),
                actual: state.saga_type,
            });
        }
        if !state.status.can_resume() {
            return Err(SagaError::InvalidState {
                saga_id,
                operation: "resume",
                status: state.status,
            });
        }

        let behavior = self
            .registry
            .resolve(S::saga_type())
            .ok_or_else(|| SagaError::UnknownSagaType(S::saga_type().to_string()))?;

        let state = self
            .store
            .update(saga_id, Box::new(|s| s.mark_running()))
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;

        tracing::info!(saga_id = %saga_id, step = state.current_step_index, "saga resumed");
        let state = match self.run_forward(&behavior, state, true).await {
            Ok(state) => state,
            Err(e) => {
                self.record_abort(saga_id, &e).await;
                return Err(e);
            }
        };
        Ok(Self::report(&state, SagaStatus::Completed))
    }

    /// Compensates a saga, undoing its executed steps in reverse order.
    ///
    /// Valid from `Failed` and from `Running` (abandon mid-flight). The
    /// saga implementation is resolved from the stored type name.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(&self, saga_id: SagaId) -> Result<SagaReport<()>> {
        let state = self
            .store
            .get(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;

        if !state.status.can_compensate() {
            return Err(SagaError::InvalidState {
                saga_id,
                operation: "compensate",
                status: state.status,
            });
        }

        let behavior = self
            .registry
            .resolve(&state.saga_type)
            .ok_or_else(|| SagaError::UnknownSagaType(state.saga_type.clone()))?;

        let state = self.run_compensation(&behavior, state, true).await?;
        let mut report = Self::report(&state, SagaStatus::Compensated);
        report.data = None;
        Ok(report)
    }

    /// Cancels a saga. Valid from `Running` and `Suspended`.
    ///
    /// The record always ends `Cancelled`. When `compensate` is true and
    /// the stored saga type is registered, executed steps are undone
    /// best-effort first; compensation failures land in the error trail
    /// without changing the final status. An unregistered type degrades
    /// to a status-only cancel.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, saga_id: SagaId, compensate: bool) -> Result<SagaReport<()>> {
        let mut state = self
            .store
            .get(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;

        if !state.status.can_cancel() {
            return Err(SagaError::InvalidState {
                saga_id,
                operation: "cancel",
                status: state.status,
            });
        }

        if compensate {
            match self.registry.resolve(&state.saga_type) {
                Some(behavior) => {
                    self.unwind_steps(&behavior, &mut state, true).await?;
                }
                None => {
                    tracing::warn!(
                        %saga_id,
                        saga_type = %state.saga_type,
                        "saga type not registered, cancelling without compensation"
                    );
                }
            }
        }

        let state = self
            .store
            .update(
                saga_id,
                Box::new({
                    let unwound = state.clone();
                    move |s| {
                        s.payload = unwound.payload.clone();
                        s.compensation_errors = unwound.compensation_errors.clone();
                        s.record_error(None, "cancelled by caller request");
                        s.enter_terminal(SagaStatus::Cancelled);
                    }
                }),
            )
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;

        metrics::counter!("saga_cancelled").increment(1);
        tracing::info!(%saga_id, "saga cancelled");

        Ok(SagaReport {
            saga_id,
            success: true,
            status: state.status,
            data: None,
            error: None,
        })
    }

    /// Read-only projection of a saga's persisted state.
    pub async fn get_status(&self, saga_id: SagaId) -> Result<SagaState> {
        self.store
            .get(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))
    }

    /// Re-executes every suspended saga whose scheduled retry is due.
    ///
    /// Each candidate is atomically flipped to `Running` with its retry
    /// counter incremented before re-execution; another retryable
    /// failure re-suspends it with a larger backoff while budget
    /// remains, and exhaustion marks it permanently `Failed`. Returns
    /// the number of sagas processed.
    #[tracing::instrument(skip(self))]
    pub async fn process_retry_queue(&self, now: DateTime<Utc>) -> Result<u64> {
        let ready = self.store.get_ready_for_retry(now).await?;
        let mut processed = 0u64;

        for state in ready {
            let saga_id = state.saga_id;
            let Some(behavior) = self.registry.resolve(&state.saga_type) else {
                tracing::warn!(
                    %saga_id,
                    saga_type = %state.saga_type,
                    "saga type not registered, skipping retry"
                );
                continue;
            };

            let Some(running) = self
                .store
                .update(
                    saga_id,
                    Box::new(|s| {
                        s.retry_count += 1;
                        s.mark_running();
                    }),
                )
                .await?
            else {
                continue;
            };

            metrics::counter!("saga_retries_total").increment(1);
            tracing::info!(%saga_id, retry = running.retry_count, "saga retry started");
            if let Err(e) = self.run_forward(&behavior, running, true).await {
                // One broken record must not strand itself as Running or
                // starve the rest of this tick's ready set.
                metrics::counter!("saga_retry_aborts").increment(1);
                tracing::warn!(%saga_id, error = %e, "saga retry aborted");
                self.record_abort(saga_id, &e).await;
            }
            processed += 1;
        }

        Ok(processed)
    }

    /// Marks every `Running` saga past its timeout as `TimedOut`.
    ///
    /// Reporting-only: no compensation is attempted here. A caller
    /// wanting compensation-on-timeout invokes `compensate` afterward.
    /// Returns the number of sagas marked.
    #[tracing::instrument(skip(self))]
    pub async fn process_timeouts(&self, now: DateTime<Utc>) -> Result<u64> {
        let timed_out = self.store.get_timed_out(now).await?;
        let mut processed = 0u64;

        for state in timed_out {
            let saga_id = state.saga_id;
            let updated = self
                .store
                .update(
                    saga_id,
                    Box::new(|s| {
                        let step = s.current_step_name.clone();
                        s.record_error(step.as_deref(), "saga exceeded its timeout");
                        s.enter_terminal(SagaStatus::TimedOut);
                    }),
                )
                .await?;

            if updated.is_some() {
                metrics::counter!("saga_timeouts_total").increment(1);
                tracing::warn!(%saga_id, "saga timed out");
                processed += 1;
            }
        }

        Ok(processed)
    }

    /// Deletes terminal records completed before the cutoff. Returns the
    /// count deleted.
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        Ok(self.store.cleanup(older_than).await?)
    }

    /// Runs steps forward from `current_step_index`, persisting progress
    /// at every step boundary so a resume lands exactly where execution
    /// stopped.
    async fn run_forward(
        &self,
        behavior: &Arc<dyn SagaBehavior>,
        mut state: SagaState,
        persist: bool,
    ) -> Result<SagaState> {
        while state.current_step_index < behavior.step_count() {
            let index = state.current_step_index;
            let step_name = behavior.step_name(index).to_string();
            state.begin_step(&step_name);
            tracing::info!(saga_id = %state.saga_id, step = %step_name, "saga step started");

            match behavior.execute_step(index, state.payload.clone()).await {
                Ok(payload) => {
                    state.record_step_completed(&step_name, payload);
                    if persist {
                        self.persist(&mut state).await?;
                    }
                }
                Err(StepExecutionError::Payload(e)) => return Err(e.into()),
                Err(StepExecutionError::Step(err)) => {
                    state.record_error(Some(&step_name), &err.message);
                    tracing::warn!(
                        saga_id = %state.saga_id,
                        step = %step_name,
                        reason = %err.message,
                        "saga step failed"
                    );

                    if err.retryable && state.can_schedule_retry() {
                        let delay = self.retry_policy.delay_for(state.retry_count);
                        state.schedule_retry(Utc::now() + delay);
                        if persist {
                            self.persist(&mut state).await?;
                        }
                        metrics::counter!("saga_suspended").increment(1);
                        tracing::info!(
                            saga_id = %state.saga_id,
                            retry_count = state.retry_count,
                            "saga suspended for retry"
                        );
                        return Ok(state);
                    }

                    if err.retryable {
                        state.record_error(
                            Some(&step_name),
                            format!(
                                "retry budget exhausted after {} retries",
                                state.retry_count
                            ),
                        );
                    }

                    state.mark_failed();
                    if persist {
                        self.persist(&mut state).await?;
                    }
                    metrics::counter!("saga_failed").increment(1);
                    return self.run_compensation(behavior, state, persist).await;
                }
            }
        }

        state.enter_terminal(SagaStatus::Completed);
        if persist {
            self.persist(&mut state).await?;
        }
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(saga_id = %state.saga_id, "saga completed");
        Ok(state)
    }

    /// Runs the full compensation pass and settles the terminal status.
    async fn run_compensation(
        &self,
        behavior: &Arc<dyn SagaBehavior>,
        mut state: SagaState,
        persist: bool,
    ) -> Result<SagaState> {
        metrics::counter!("saga_compensations_total").increment(1);
        state.mark_compensating();
        if persist {
            self.persist(&mut state).await?;
        }

        let failed_steps = self.unwind_steps(behavior, &mut state, persist).await?;

        if failed_steps.is_empty() {
            state.enter_terminal(SagaStatus::Compensated);
            tracing::info!(saga_id = %state.saga_id, "saga compensated");
        } else {
            state.enter_terminal(SagaStatus::PartiallyCompensated);
            tracing::warn!(
                saga_id = %state.saga_id,
                failed_steps = ?failed_steps,
                "saga partially compensated"
            );
        }
        if persist {
            self.persist(&mut state).await?;
        }
        Ok(state)
    }

    /// Compensates executed steps in reverse order, best-effort.
    ///
    /// A single compensation failure does not abort the rest: forward
    /// progress already happened, so undoing as much as possible beats
    /// stopping early. Returns the names of steps whose compensation
    /// failed.
    async fn unwind_steps(
        &self,
        behavior: &Arc<dyn SagaBehavior>,
        state: &mut SagaState,
        persist: bool,
    ) -> Result<Vec<String>> {
        let executed = state.executed_steps.clone();
        let mut failed_steps = Vec::new();

        for (index, step_name) in executed.iter().enumerate().rev() {
            if index >= behavior.step_count() {
                tracing::warn!(
                    saga_id = %state.saga_id,
                    step = %step_name,
                    "executed step has no definition, skipping compensation"
                );
                continue;
            }
            if !behavior.step_can_compensate(index) {
                tracing::debug!(
                    saga_id = %state.saga_id,
                    step = %step_name,
                    "step not compensable, skipped"
                );
                continue;
            }

            match behavior.compensate_step(index, state.payload.clone()).await {
                Ok(payload) => {
                    state.payload = payload;
                    if persist {
                        self.persist(state).await?;
                    }
                }
                Err(StepExecutionError::Payload(e)) => return Err(e.into()),
                Err(StepExecutionError::Step(err)) => {
                    state.record_compensation_error(step_name, &err.message);
                    failed_steps.push(step_name.clone());
                    tracing::warn!(
                        saga_id = %state.saga_id,
                        step = %step_name,
                        reason = %err.message,
                        "compensation step failed"
                    );
                    if persist {
                        self.persist(state).await?;
                    }
                }
            }
        }

        Ok(failed_steps)
    }

    /// Repairs a saga stranded mid-flight by a structural error (for
    /// example a stored payload that no longer deserializes to the
    /// saga's data type): the fault goes into the error trail and the
    /// saga is marked `Failed`, keeping it visible to compensation and
    /// operators instead of sitting `Running` forever.
    async fn record_abort(&self, saga_id: SagaId, error: &SagaError) {
        let message = error.to_string();
        let result = self
            .store
            .update(
                saga_id,
                Box::new(move |s| {
                    let step = s.current_step_name.clone();
                    s.record_error(step.as_deref(), message.clone());
                    s.mark_failed();
                }),
            )
            .await;
        if let Err(e) = result {
            tracing::error!(%saga_id, error = %e, "could not record aborted saga");
        }
    }

    /// Writes the in-flight snapshot through the store's atomic update,
    /// adopting the stored revision.
    async fn persist(&self, state: &mut SagaState) -> Result<()> {
        let snapshot = state.clone();
        let updated = self
            .store
            .update(
                snapshot.saga_id,
                Box::new(move |s| {
                    let mut next = snapshot.clone();
                    next.version = s.version;
                    *s = next;
                }),
            )
            .await?;

        match updated {
            Some(stored) => {
                *state = stored;
                Ok(())
            }
            // Record was deleted out from under us; recreate it.
            None => Ok(self.store.save(state.clone()).await?),
        }
    }

    fn report<D: DeserializeOwned>(state: &SagaState, happy: SagaStatus) -> SagaReport<D> {
        let error = state
            .compensation_errors
            .last()
            .or(state.errors.last())
            .map(|fault| fault.message.clone());
        SagaReport {
            saga_id: state.saga_id,
            success: state.status == happy,
            status: state.status,
            data: serde_json::from_value(state.payload.clone()).ok(),
            error,
        }
    }
}
