//! # Stage Transition Table
//!
//! One `StageRule` per stage describes where a dispatch may start, which step
//! marks it in flight, where success lands and which queue carries the work.
//! Adding a stage is a new enum variant plus a new row; the exhaustive match in
//! [`StageAction::rule`] makes a missing row a compile error.

use super::events::StageAction;
use super::progress::StageProgress;
use super::states::ItemStep;
use crate::constants::{queues, routing_keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRule {
    pub action: StageAction,
    /// Steps a normal dispatch may start from
    pub allowed_from: &'static [ItemStep],
    pub in_flight: ItemStep,
    /// Success target when the stage's nominal preconditions held
    pub completed: ItemStep,
    pub queue: &'static str,
    pub routing_key: &'static str,
}

static EXTRACT: StageRule = StageRule {
    action: StageAction::Extract,
    allowed_from: &[ItemStep::Uploaded],
    in_flight: ItemStep::Extracting,
    completed: ItemStep::ExtractCompleted,
    queue: queues::VOICE_EXTRACT,
    routing_key: routing_keys::EXTRACT,
};

static CLEAR: StageRule = StageRule {
    action: StageAction::Clear,
    allowed_from: &[ItemStep::ExtractCompleted, ItemStep::UnclearTranscribed],
    in_flight: ItemStep::Clearing,
    completed: ItemStep::ClearCompleted,
    queue: queues::AUDIO_CLEAR,
    routing_key: routing_keys::CLEAR,
};

static FAST: StageRule = StageRule {
    action: StageAction::Fast,
    allowed_from: &[ItemStep::ClearCompleted, ItemStep::ExtractCompleted],
    in_flight: ItemStep::FastRecognizing,
    completed: ItemStep::FastCompleted,
    queue: queues::FAST_PROCESS,
    routing_key: routing_keys::FAST,
};

static TRANSCRIBE: StageRule = StageRule {
    action: StageAction::Transcribe,
    allowed_from: &[
        ItemStep::ClearCompleted,
        ItemStep::FastCompleted,
        ItemStep::UnclearTranscribed,
    ],
    in_flight: ItemStep::Transcribing,
    completed: ItemStep::AllCompleted,
    queue: queues::TRANSCRIBE,
    routing_key: routing_keys::TRANSCRIBE,
};

impl StageAction {
    pub fn rule(self) -> &'static StageRule {
        match self {
            Self::Extract => &EXTRACT,
            Self::Clear => &CLEAR,
            Self::Fast => &FAST,
            Self::Transcribe => &TRANSCRIBE,
        }
    }

    pub fn queue_name(self) -> &'static str {
        self.rule().queue
    }
}

/// Step reached when `action` succeeds, given the progress after recording it.
///
/// A transcript of undenoised audio on an item that has since been denoised
/// is already outdated, so the item rests where its other stages put it.
pub fn success_target(action: StageAction, progress: &StageProgress) -> ItemStep {
    match action {
        StageAction::Transcribe => progress.resting_step(),
        _ => action.rule().completed,
    }
}

/// Step a failed dispatch or failed callback lands on
pub const FAILURE_TARGET: ItemStep = ItemStep::Failed;
