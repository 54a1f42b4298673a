//! # Pipeline Error Types
//!
//! Crate-level error taxonomy. Validation, not-found and precondition errors
//! are raised before any state mutation; transport and worker failures leave
//! an auditable trail on the item itself.

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::state_machine::{GuardError, StateMachineError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Transport error: {0}")]
    Transport(#[from] MessagingError),

    #[error("Worker reported failure for item {item_id} during {stage}: {message}")]
    WorkerFailure {
        item_id: i64,
        stage: String,
        message: String,
    },

    #[error("Concurrent modification of {entity} {id} after {attempts} attempts")]
    ConcurrentModification {
        entity: &'static str,
        id: i64,
        attempts: u32,
    },

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn item_not_found(item_id: i64) -> Self {
        Self::NotFound {
            entity: "item",
            id: item_id,
        }
    }

    pub fn task_not_found(task_id: i64) -> Self {
        Self::NotFound {
            entity: "task",
            id: task_id,
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// True when the error was raised before anything was written
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::Precondition(_)
        )
    }
}

impl From<GuardError> for PipelineError {
    fn from(err: GuardError) -> Self {
        Self::Precondition(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
