//! Shared types used across the saga orchestration workspace.

pub mod types;

pub use types::SagaId;
