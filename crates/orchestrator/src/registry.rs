//! Saga type registry.
//!
//! Maps saga type names to their executable behaviors. Built explicitly
//! at startup; resume, retry, and compensation look implementations up
//! here instead of using runtime reflection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::saga::{SagaBehavior, SagaDefinition, StepSaga};

/// Registry of saga types known to the orchestrator.
#[derive(Default)]
pub struct SagaRegistry {
    behaviors: HashMap<String, Arc<dyn SagaBehavior>>,
}

impl SagaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a saga definition under its type name. A later
    /// registration for the same name replaces the earlier one.
    pub fn register<S: SagaDefinition>(&mut self, definition: &S) {
        self.behaviors.insert(
            S::saga_type().to_string(),
            Arc::new(StepSaga::new(definition)),
        );
    }

    /// Resolves the behavior for a saga type name.
    pub fn resolve(&self, saga_type: &str) -> Option<Arc<dyn SagaBehavior>> {
        self.behaviors.get(saga_type).cloned()
    }

    /// Returns true if a saga type is registered.
    pub fn contains(&self, saga_type: &str) -> bool {
        self.behaviors.contains_key(saga_type)
    }

    /// Number of registered saga types.
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Returns true if no saga types are registered.
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}
