use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::StateMachineError;

/// The four processing stages a client can dispatch an item to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    /// Extract the audio track from a video source
    Extract,
    /// Denoise the audio
    Clear,
    /// Fast voice-activity recognition
    Fast,
    /// Full transcription
    Transcribe,
}

impl StageAction {
    pub const ALL: [StageAction; 4] = [Self::Extract, Self::Clear, Self::Fast, Self::Transcribe];

    /// Numeric task-type code used by workers and dispatch requests
    pub fn task_type_code(self) -> u8 {
        match self {
            Self::Extract => 1,
            Self::Clear => 2,
            Self::Fast => 3,
            Self::Transcribe => 4,
        }
    }

    pub fn from_task_type_code(code: i64) -> Result<Self, StateMachineError> {
        match code {
            1 => Ok(Self::Extract),
            2 => Ok(Self::Clear),
            3 => Ok(Self::Fast),
            4 => Ok(Self::Transcribe),
            other => Err(StateMachineError::InvalidCode {
                kind: "stage",
                code: other,
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Clear => "clear",
            Self::Fast => "fast",
            Self::Transcribe => "transcribe",
        }
    }
}

impl fmt::Display for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts stage names, common aliases and numeric task-type codes
impl std::str::FromStr for StageAction {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if let Ok(code) = normalized.parse::<i64>() {
            return Self::from_task_type_code(code);
        }
        match normalized.as_str() {
            "extract" | "voice_extract" => Ok(Self::Extract),
            "clear" | "denoise" | "audio_clear" => Ok(Self::Clear),
            "fast" | "fast_recognize" | "fast-recognize" | "fast_process" => Ok(Self::Fast),
            "transcribe" => Ok(Self::Transcribe),
            _ => Err(StateMachineError::InvalidName {
                kind: "stage",
                value: s.to_string(),
            }),
        }
    }
}

/// Outcome reported by a worker callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Success,
    Failed,
    /// Progress heartbeat; carries no state change
    Processing,
}

impl CallbackOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for CallbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CallbackOutcome {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failed" | "failure" => Ok(Self::Failed),
            "processing" => Ok(Self::Processing),
            _ => Err(StateMachineError::InvalidName {
                kind: "callback outcome",
                value: s.to_string(),
            }),
        }
    }
}
