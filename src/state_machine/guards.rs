//! # Dispatch Guards
//!
//! Preconditions a dispatch must satisfy before the item is claimed. Guards
//! are pure: they read an [`Item`] snapshot and never touch storage. The
//! dispatcher re-runs them against a fresh snapshot whenever its
//! compare-and-swap claim loses a race.

use super::errors::{GuardError, GuardResult};
use super::events::StageAction;
use super::states::ItemStep;
use crate::models::{Item, MediaKind};

/// Caller-supplied switches that relax the guards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardOptions {
    /// Allow transcription of audio that was never denoised
    pub without_denoise: bool,
}

/// Step used to decide whether `action` may start.
///
/// A failed item gates as the step its completed stages imply, so an
/// explicit re-dispatch resumes where it broke. An audio upload needs no
/// extraction and gates as if extraction had completed.
pub fn gating_step(item: &Item, action: StageAction) -> ItemStep {
    let step = match item.step() {
        ItemStep::Failed => item.progress().resting_step(),
        step => step,
    };
    if step == ItemStep::Uploaded
        && item.media_kind == MediaKind::Audio
        && action != StageAction::Extract
    {
        ItemStep::ExtractCompleted
    } else {
        step
    }
}

/// Whether `action` may start from the settled step `gating`.
///
/// Transcription is also reachable straight from extracted audio; the guards
/// only allow that on an explicit without-denoise request.
pub fn can_start_from(action: StageAction, gating: ItemStep) -> bool {
    action.rule().allowed_from.contains(&gating)
        || (action == StageAction::Transcribe && gating == ItemStep::ExtractCompleted)
}

/// Check every precondition for dispatching `item` to `action`
pub fn check_dispatch(item: &Item, action: StageAction, options: GuardOptions) -> GuardResult<()> {
    let item_id = item.item_id;
    let step = item.step();

    if step == ItemStep::Paused {
        return Err(GuardError::Paused { item_id });
    }
    if step.is_in_flight() {
        return Err(GuardError::AlreadyProcessing { item_id, step });
    }
    if item.progress().has_completed(action) {
        return Err(GuardError::AlreadyCompleted { item_id, action });
    }

    let gating = gating_step(item, action);
    let reachable = can_start_from(action, gating);
    if reachable
        && action == StageAction::Transcribe
        && !item.progress().denoised
        && !options.without_denoise
        && gating != ItemStep::UnclearTranscribed
    {
        return Err(GuardError::DenoiseRequired { item_id });
    }
    if !reachable {
        return Err(GuardError::StepNotAllowed {
            item_id,
            action,
            step: gating,
        });
    }

    if item.input_url_for(action).is_none() {
        return Err(GuardError::MissingInput {
            item_id,
            action,
            input: input_name(action),
        });
    }

    Ok(())
}

fn input_name(action: StageAction) -> &'static str {
    match action {
        StageAction::Extract => "source url",
        StageAction::Clear => "extracted or source audio url",
        StageAction::Fast | StageAction::Transcribe => "audio url",
    }
}
