use thiserror::Error;

use super::events::StageAction;
use super::states::ItemStep;

/// Errors raised while decoding or constructing item state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid {kind} code: {code}")]
    InvalidCode { kind: &'static str, code: i64 },

    #[error("Invalid {kind}: {value}")]
    InvalidName { kind: &'static str, value: String },

    #[error("Inconsistent item state at step {step}: {reason}")]
    InconsistentState { step: ItemStep, reason: &'static str },
}

/// Reasons a dispatch is refused before anything is published
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("item {item_id} is paused")]
    Paused { item_id: i64 },

    #[error("item {item_id} is already processing ({step}), duplicate submission rejected")]
    AlreadyProcessing { item_id: i64, step: ItemStep },

    #[error("item {item_id} has already completed {action}, duplicate submission rejected")]
    AlreadyCompleted { item_id: i64, action: StageAction },

    #[error("item {item_id} cannot {action} from step {step}")]
    StepNotAllowed {
        item_id: i64,
        action: StageAction,
        step: ItemStep,
    },

    #[error("item {item_id} has no {input} to {action}")]
    MissingInput {
        item_id: i64,
        action: StageAction,
        input: &'static str,
    },

    #[error("item {item_id} is not denoised; transcription requires denoise or an explicit without_denoise request")]
    DenoiseRequired { item_id: i64 },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;
