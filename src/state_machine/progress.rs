//! # Item Progress
//!
//! `ItemState` pairs the current step with the set of completed stages. Its
//! fields are private: every value is either built by a validated constructor
//! or produced by one of the transition methods, so a step that contradicts
//! the completion record cannot be constructed.

use serde::{Deserialize, Serialize};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::StageAction;
use super::states::ItemStep;
use super::transitions::{success_target, FAILURE_TARGET};

/// Which audio a transcript was produced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptQuality {
    Undenoised,
    Denoised,
}

/// Completion record of the four stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub extracted: bool,
    pub denoised: bool,
    pub fast_recognized: bool,
    pub transcript: Option<TranscriptQuality>,
}

impl StageProgress {
    pub fn is_transcribed(&self) -> bool {
        self.transcript.is_some()
    }

    /// A transcript exists and no better one can be produced.
    ///
    /// An undenoised transcript becomes stale once the audio is denoised,
    /// which is what re-opens transcription for that item.
    pub fn transcript_is_current(&self) -> bool {
        match self.transcript {
            Some(TranscriptQuality::Denoised) => true,
            Some(TranscriptQuality::Undenoised) => !self.denoised,
            None => false,
        }
    }

    pub fn has_completed(&self, action: StageAction) -> bool {
        match action {
            StageAction::Extract => self.extracted,
            StageAction::Clear => self.denoised,
            StageAction::Fast => self.fast_recognized,
            StageAction::Transcribe => self.transcript_is_current(),
        }
    }

    /// Mark a stage as completed
    pub fn record(&mut self, action: StageAction) {
        match action {
            StageAction::Extract => self.extracted = true,
            StageAction::Clear => self.denoised = true,
            StageAction::Fast => self.fast_recognized = true,
            StageAction::Transcribe => {
                self.transcript = Some(if self.denoised {
                    TranscriptQuality::Denoised
                } else {
                    TranscriptQuality::Undenoised
                });
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Step an item rests at when nothing is in flight
    pub fn resting_step(&self) -> ItemStep {
        match self.transcript {
            Some(TranscriptQuality::Denoised) => return ItemStep::AllCompleted,
            Some(TranscriptQuality::Undenoised) if !self.denoised => {
                return ItemStep::UnclearTranscribed
            }
            _ => {}
        }
        if self.fast_recognized {
            ItemStep::FastCompleted
        } else if self.denoised {
            ItemStep::ClearCompleted
        } else if self.extracted {
            ItemStep::ExtractCompleted
        } else {
            ItemStep::Uploaded
        }
    }
}

/// Step plus completion record, always mutually consistent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ItemState {
    step: ItemStep,
    progress: StageProgress,
    transcribe_undenoised: bool,
}

impl ItemState {
    /// State of a freshly uploaded item
    pub fn uploaded() -> Self {
        Self {
            step: ItemStep::Uploaded,
            progress: StageProgress::default(),
            transcribe_undenoised: false,
        }
    }

    /// Rebuild a state from persisted parts, rejecting contradictions
    pub fn from_parts(
        step: ItemStep,
        progress: StageProgress,
        transcribe_undenoised: bool,
    ) -> StateMachineResult<Self> {
        let state = Self {
            step,
            progress,
            transcribe_undenoised,
        };
        state.validate()?;
        Ok(state)
    }

    pub fn step(&self) -> ItemStep {
        self.step
    }

    pub fn progress(&self) -> &StageProgress {
        &self.progress
    }

    pub fn transcribe_undenoised(&self) -> bool {
        self.transcribe_undenoised
    }

    /// Hand the item to a worker for `action`.
    ///
    /// Transcribing undenoised audio marks the state; the dispatch guards only
    /// let that through on an explicit without-denoise request or `force`.
    pub fn begin(self, action: StageAction) -> Self {
        Self {
            step: action.rule().in_flight,
            progress: self.progress,
            transcribe_undenoised: action == StageAction::Transcribe && !self.progress.denoised,
        }
    }

    /// Record a successful stage and advance to its success target
    pub fn complete(self, action: StageAction) -> Self {
        let progress = self.recorded(action);
        Self {
            step: success_target(action, &progress),
            progress,
            transcribe_undenoised: false,
        }
    }

    /// Record a stage result without moving the step (late result while another stage runs)
    pub fn record_out_of_band(self, action: StageAction) -> Self {
        let progress = self.recorded(action);
        let candidate = Self {
            step: self.step,
            progress,
            transcribe_undenoised: self.transcribe_undenoised,
        };
        if candidate.validate().is_ok() {
            candidate
        } else {
            Self {
                step: progress.resting_step(),
                progress,
                transcribe_undenoised: false,
            }
        }
    }

    /// Progress with a result for `action` recorded.
    ///
    /// A transcript is labelled by the audio its dispatch used. While
    /// transcription is in flight the without-denoise marker says which; a
    /// result arriving outside it counts as undenoised unless the item is
    /// denoised and holds no undenoised transcript it could be a redelivery of.
    fn recorded(&self, action: StageAction) -> StageProgress {
        let mut progress = self.progress;
        progress.record(action);
        if action == StageAction::Transcribe {
            let undenoised = if self.step == ItemStep::Transcribing {
                self.transcribe_undenoised
            } else {
                !self.progress.denoised
                    || self.progress.transcript == Some(TranscriptQuality::Undenoised)
            };
            progress.transcript = Some(if undenoised {
                TranscriptQuality::Undenoised
            } else {
                TranscriptQuality::Denoised
            });
        }
        progress
    }

    pub fn fail(self) -> Self {
        Self {
            step: FAILURE_TARGET,
            progress: self.progress,
            transcribe_undenoised: false,
        }
    }

    fn validate(&self) -> StateMachineResult<()> {
        let p = &self.progress;
        let violation = match self.step {
            ItemStep::Uploaded if !p.is_empty() => Some("uploaded item has completed stages"),
            ItemStep::ExtractCompleted if !p.extracted => Some("extract not recorded"),
            ItemStep::ClearCompleted if !p.denoised => Some("denoise not recorded"),
            ItemStep::FastCompleted if !p.fast_recognized => {
                Some("fast recognition not recorded")
            }
            ItemStep::AllCompleted if p.transcript != Some(TranscriptQuality::Denoised) => {
                Some("no transcript from denoised audio")
            }
            ItemStep::UnclearTranscribed
                if p.transcript != Some(TranscriptQuality::Undenoised) =>
            {
                Some("no undenoised transcript")
            }
            ItemStep::Transcribing if !p.denoised && !self.transcribe_undenoised => {
                Some("transcribing undenoised audio without an explicit request")
            }
            _ => None,
        };
        if violation.is_none() && self.transcribe_undenoised && self.step != ItemStep::Transcribing
        {
            return Err(StateMachineError::InconsistentState {
                step: self.step,
                reason: "without-denoise marker outside transcription",
            });
        }
        match violation {
            Some(reason) => Err(StateMachineError::InconsistentState {
                step: self.step,
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl Default for ItemState {
    fn default() -> Self {
        Self::uploaded()
    }
}
