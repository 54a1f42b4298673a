use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::StateMachineError;
use super::events::StageAction;

/// Processing step of a single item, persisted and sent to workers as its numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ItemStep {
    /// File uploaded, nothing dispatched yet
    Uploaded,
    Extracting,
    ExtractCompleted,
    Clearing,
    ClearCompleted,
    FastRecognizing,
    /// Fast recognition done, waiting for the user to decide on transcription
    FastCompleted,
    Transcribing,
    AllCompleted,
    Failed,
    Paused,
    /// Transcribed from audio that was never denoised
    UnclearTranscribed,
}

impl ItemStep {
    pub const ALL: [ItemStep; 12] = [
        Self::Uploaded,
        Self::Extracting,
        Self::ExtractCompleted,
        Self::Clearing,
        Self::ClearCompleted,
        Self::FastRecognizing,
        Self::FastCompleted,
        Self::Transcribing,
        Self::AllCompleted,
        Self::Failed,
        Self::Paused,
        Self::UnclearTranscribed,
    ];

    pub const IN_FLIGHT: [ItemStep; 4] = [
        Self::Extracting,
        Self::Clearing,
        Self::FastRecognizing,
        Self::Transcribing,
    ];

    pub fn code(self) -> u8 {
        match self {
            Self::Uploaded => 0,
            Self::Extracting => 1,
            Self::ExtractCompleted => 2,
            Self::Clearing => 3,
            Self::ClearCompleted => 4,
            Self::FastRecognizing => 5,
            Self::FastCompleted => 6,
            Self::Transcribing => 7,
            Self::AllCompleted => 8,
            Self::Failed => 9,
            Self::Paused => 10,
            Self::UnclearTranscribed => 11,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, StateMachineError> {
        Self::ALL
            .into_iter()
            .find(|step| step.code() == code)
            .ok_or(StateMachineError::InvalidCode {
                kind: "item step",
                code: i64::from(code),
            })
    }

    /// A worker currently owns the item
    pub fn is_in_flight(self) -> bool {
        self.in_flight_stage().is_some()
    }

    /// Stage a worker is running for this step, if any
    pub fn in_flight_stage(self) -> Option<StageAction> {
        match self {
            Self::Extracting => Some(StageAction::Extract),
            Self::Clearing => Some(StageAction::Clear),
            Self::FastRecognizing => Some(StageAction::Fast),
            Self::Transcribing => Some(StageAction::Transcribe),
            _ => None,
        }
    }

    /// Absorbing states; leaving them requires an explicit re-dispatch or user action
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AllCompleted | Self::Failed | Self::Paused)
    }

    /// Counts as "still processing" for the parent task's roll-up.
    ///
    /// Everything before a recognition output exists is pending; fast and
    /// transcription results settle the item.
    pub fn is_pending_for_rollup(self) -> bool {
        matches!(
            self,
            Self::Uploaded
                | Self::Extracting
                | Self::ExtractCompleted
                | Self::Clearing
                | Self::ClearCompleted
                | Self::FastRecognizing
                | Self::Transcribing
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Uploaded => "file uploaded, waiting for processing",
            Self::Extracting => "extracting audio",
            Self::ExtractCompleted => "audio extracted, waiting for denoise",
            Self::Clearing => "denoising audio",
            Self::ClearCompleted => "audio denoised, waiting for next stage",
            Self::FastRecognizing => "running fast recognition",
            Self::FastCompleted => "fast recognition done, waiting for transcription decision",
            Self::Transcribing => "transcribing",
            Self::AllCompleted => "all processing completed",
            Self::Failed => "processing failed",
            Self::Paused => "paused",
            Self::UnclearTranscribed => "transcribed without denoise",
        }
    }
}

impl From<ItemStep> for u8 {
    fn from(step: ItemStep) -> Self {
        step.code()
    }
}

impl TryFrom<u8> for ItemStep {
    type Error = StateMachineError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl TryFrom<i16> for ItemStep {
    type Error = StateMachineError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        u8::try_from(code)
            .map_err(|_| StateMachineError::InvalidCode {
                kind: "item step",
                code: i64::from(code),
            })
            .and_then(Self::from_code)
    }
}

impl fmt::Display for ItemStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uploaded => "uploaded",
            Self::Extracting => "extracting",
            Self::ExtractCompleted => "extract_completed",
            Self::Clearing => "clearing",
            Self::ClearCompleted => "clear_completed",
            Self::FastRecognizing => "fast_recognizing",
            Self::FastCompleted => "fast_completed",
            Self::Transcribing => "transcribing",
            Self::AllCompleted => "all_completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::UnclearTranscribed => "unclear_transcribed",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ItemStep {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.to_string() == s)
            .ok_or_else(|| StateMachineError::InvalidName {
                kind: "item step",
                value: s.to_string(),
            })
    }
}

impl Default for ItemStep {
    fn default() -> Self {
        Self::Uploaded
    }
}

/// Roll-up status of a task, computed from its items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskStatus {
    Empty,
    /// Every settled item has at least a fast-recognition result
    Checked,
    Transcribed,
    Processing,
    /// Set by the user outside the pipeline core; never overwritten by roll-up
    Paused,
}

impl TaskStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Empty => 1,
            Self::Checked => 2,
            Self::Transcribed => 3,
            Self::Processing => 4,
            Self::Paused => 5,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, StateMachineError> {
        match code {
            1 => Ok(Self::Empty),
            2 => Ok(Self::Checked),
            3 => Ok(Self::Transcribed),
            4 => Ok(Self::Processing),
            5 => Ok(Self::Paused),
            other => Err(StateMachineError::InvalidCode {
                kind: "task status",
                code: i64::from(other),
            }),
        }
    }
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for TaskStatus {
    type Error = StateMachineError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl TryFrom<i16> for TaskStatus {
    type Error = StateMachineError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        u8::try_from(code)
            .map_err(|_| StateMachineError::InvalidCode {
                kind: "task status",
                code: i64::from(code),
            })
            .and_then(Self::from_code)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Checked => write!(f, "checked"),
            Self::Transcribed => write!(f, "transcribed"),
            Self::Processing => write!(f, "processing"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Empty
    }
}
