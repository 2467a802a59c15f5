//! Saga orchestration: typed saga definitions, a type-erased registry,
//! the orchestrator driving execution and compensation, and the
//! background sweeper for timeouts, retries, and cleanup.

pub mod error;
pub mod options;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod saga;
pub mod step;
pub mod sweeper;

pub use error::{Result, SagaError};
pub use options::{SagaExecutionOptions, SagaReport};
pub use orchestrator::SagaOrchestrator;
pub use registry::SagaRegistry;
pub use retry::RetryPolicy;
pub use saga::{SagaBehavior, SagaDefinition, StepSaga};
pub use step::{SagaStep, StepError};
pub use sweeper::{BackgroundSweeper, SweeperConfig};
