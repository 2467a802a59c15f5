//! Saga definitions and the type-erased execution surface.
//!
//! Saga authors implement [`SagaDefinition`] with a typed payload and an
//! ordered step list. The engine erases the payload type behind
//! [`SagaBehavior`] so that the orchestrator, registry, and sweeper can
//! drive any saga from its persisted [`state_store::SagaState`] alone.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::step::{SagaStep, StepError};

/// A saga type: a typed payload plus an ordered list of steps.
///
/// There is no definition DSL; authors supply the steps and the engine
/// only sequences them.
pub trait SagaDefinition: Send + Sync + 'static {
    /// The in-memory payload the steps mutate. Serialized to JSON at
    /// every persisted step boundary.
    type Data: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Stable name stored into `SagaState.saga_type` and used to resolve
    /// this implementation on resume.
    fn saga_type() -> &'static str;

    /// The ordered step list.
    fn steps(&self) -> Vec<Arc<dyn SagaStep<Self::Data>>>;
}

/// Failure of a single erased step invocation.
#[derive(Debug)]
pub enum StepExecutionError {
    /// The step's own action failed.
    Step(StepError),
    /// The stored payload could not be (de)serialized for the step's
    /// payload type. Indicates a programming error, not a business
    /// failure.
    Payload(serde_json::Error),
}

/// Type-erased view of a saga used by the orchestrator.
///
/// Implementations carry no per-instance state; the same behavior value
/// serves every instance of its saga type.
#[async_trait]
pub trait SagaBehavior: Send + Sync {
    /// The saga type name this behavior executes.
    fn saga_type(&self) -> &'static str;

    /// Number of steps in the saga.
    fn step_count(&self) -> usize;

    /// Name of the step at `index`.
    fn step_name(&self, index: usize) -> &str;

    /// Whether the step at `index` can be compensated.
    fn step_can_compensate(&self, index: usize) -> bool;

    /// Executes the step at `index` against the serialized payload,
    /// returning the payload as of the step boundary.
    async fn execute_step(
        &self,
        index: usize,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, StepExecutionError>;

    /// Compensates the step at `index` against the serialized payload.
    async fn compensate_step(
        &self,
        index: usize,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, StepExecutionError>;
}

/// Adapter erasing a [`SagaDefinition`]'s payload type.
pub struct StepSaga<S: SagaDefinition> {
    steps: Vec<Arc<dyn SagaStep<S::Data>>>,
}

impl<S: SagaDefinition> StepSaga<S> {
    /// Captures the definition's step list.
    pub fn new(definition: &S) -> Self {
        Self {
            steps: definition.steps(),
        }
    }
}

#[async_trait]
impl<S: SagaDefinition> SagaBehavior for StepSaga<S> {
    fn saga_type(&self) -> &'static str {
        S::saga_type()
    }

    fn step_count(&self) -> usize {
        self.steps.len()
    }

    fn step_name(&self, index: usize) -> &str {
        self.steps[index].name()
    }

    fn step_can_compensate(&self, index: usize) -> bool {
        self.steps[index].can_compensate()
    }

    async fn execute_step(
        &self,
        index: usize,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, StepExecutionError> {
        let mut data: S::Data =
            serde_json::from_value(payload).map_err(StepExecutionError::Payload)?;
        self.steps[index]
            .execute(&mut data)
            .await
            .map_err(StepExecutionError::Step)?;
        serde_json::to_value(&data).map_err(StepExecutionError::Payload)
    }

    async fn compensate_step(
        &self,
        index: usize,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, StepExecutionError> {
        let mut data: S::Data =
            serde_json::from_value(payload).map_err(StepExecutionError::Payload)?;
        self.steps[index]
            .compensate(&mut data)
            .await
            .map_err(StepExecutionError::Step)?;
        serde_json::to_value(&data).map_err(StepExecutionError::Payload)
    }
}
