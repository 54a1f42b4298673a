//! # Item Model
//!
//! One uploaded media file tracked through the pipeline independently of its
//! siblings.
//!
//! ## Database Schema
//!
//! Maps to `pipeline_items`:
//! ```sql
//! CREATE TABLE pipeline_items (
//!   item_id BIGSERIAL PRIMARY KEY,
//!   task_id BIGINT NOT NULL REFERENCES pipeline_tasks(task_id),
//!   step SMALLINT NOT NULL DEFAULT 0,
//!   is_extracted BOOLEAN NOT NULL DEFAULT false,
//!   is_denoised BOOLEAN NOT NULL DEFAULT false,
//!   is_fast_recognized BOOLEAN NOT NULL DEFAULT false,
//!   transcript_quality TEXT,
//!   lock_version BIGINT NOT NULL DEFAULT 0,
//!   -- ... media fields
//! );
//! ```
//!
//! Every write goes through a compare-and-swap on `lock_version`; see
//! [`crate::database::PipelineStore::compare_and_swap_item`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state_machine::{
    ItemState, ItemStep, StageAction, StageProgress, StateMachineError,
};

/// Kind of the uploaded source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Audio => 1,
            Self::Video => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, StateMachineError> {
        match code {
            1 => Ok(Self::Audio),
            2 => Ok(Self::Video),
            other => Err(StateMachineError::InvalidCode {
                kind: "media kind",
                code: i64::from(other),
            }),
        }
    }

    /// First stage an untouched item of this kind goes to
    pub fn first_stage(self) -> StageAction {
        match self {
            Self::Audio => StageAction::Clear,
            Self::Video => StageAction::Extract,
        }
    }
}

impl From<MediaKind> for u8 {
    fn from(kind: MediaKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u8> for MediaKind {
    type Error = StateMachineError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub item_id: i64,
    pub task_id: i64,
    pub filename: String,
    pub size_bytes: i64,
    pub media_kind: MediaKind,
    pub source_url: String,
    /// Extracted audio
    pub voice_url: Option<String>,
    /// Denoised audio
    pub clear_url: Option<String>,
    pub transcript: Option<String>,
    pub language: Option<String>,
    pub total_voice_seconds: Option<f64>,
    pub effective_voice_seconds: Option<f64>,
    pub state: ItemState,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub lock_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn step(&self) -> ItemStep {
        self.state.step()
    }

    pub fn progress(&self) -> &StageProgress {
        self.state.progress()
    }

    /// Best audio currently available: denoised, then extracted, then an audio source
    pub fn audio_url(&self) -> Option<&str> {
        fn non_empty(url: &Option<String>) -> Option<&str> {
            url.as_deref().filter(|u| !u.is_empty())
        }
        if self.progress().denoised {
            if let Some(url) = non_empty(&self.clear_url) {
                return Some(url);
            }
        }
        if let Some(url) = non_empty(&self.voice_url) {
            return Some(url);
        }
        match self.media_kind {
            MediaKind::Audio if !self.source_url.is_empty() => Some(&self.source_url),
            _ => None,
        }
    }

    /// URL a worker needs to run `action`, if the item has one
    pub fn input_url_for(&self, action: StageAction) -> Option<&str> {
        match action {
            StageAction::Extract => Some(self.source_url.as_str()).filter(|u| !u.is_empty()),
            StageAction::Clear => {
                let raw = self.voice_url.as_deref().filter(|u| !u.is_empty());
                raw.or(match self.media_kind {
                    MediaKind::Audio => Some(self.source_url.as_str()).filter(|u| !u.is_empty()),
                    MediaKind::Video => None,
                })
            }
            StageAction::Fast | StageAction::Transcribe => self.audio_url(),
        }
    }
}

/// Fields supplied by the upload layer when an item is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub task_id: i64,
    pub filename: String,
    pub size_bytes: i64,
    pub media_kind: MediaKind,
    pub source_url: String,
}

impl NewItem {
    pub fn new(
        task_id: i64,
        filename: impl Into<String>,
        media_kind: MediaKind,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            filename: filename.into(),
            size_bytes: 0,
            media_kind,
            source_url: source_url.into(),
        }
    }

    pub fn with_size(mut self, size_bytes: i64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Materialize the record the way a store would on insert
    pub fn into_item(self, item_id: i64, now: DateTime<Utc>) -> Item {
        Item {
            item_id,
            task_id: self.task_id,
            filename: self.filename,
            size_bytes: self.size_bytes,
            media_kind: self.media_kind,
            source_url: self.source_url,
            voice_url: None,
            clear_url: None,
            transcript: None,
            language: None,
            total_voice_seconds: None,
            effective_voice_seconds: None,
            state: ItemState::uploaded(),
            error_message: None,
            retry_count: 0,
            lock_version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
