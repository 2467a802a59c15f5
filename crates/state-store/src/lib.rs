//! Saga state persistence.
//!
//! Provides the durable record of each saga instance ([`SagaState`]), the
//! [`SagaStateStore`] persistence abstraction, an in-memory reference
//! implementation, and a PostgreSQL implementation for production use.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod state;
pub mod status;
pub mod store;

pub use common::SagaId;
pub use error::{Result, StateStoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use state::{SagaFault, SagaState};
pub use status::{ParseSagaStatusError, SagaStatus};
pub use store::{SagaStateStore, StateMutator};
