//! # Message Structures for Stage Queues
//!
//! Outbound dispatch envelopes and inbound worker callbacks. The field names
//! inside `task_info` and the callback aliases are the ones the deployed
//! stage workers already speak, so they must not be renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::Item;
use crate::state_machine::{CallbackOutcome, StageAction, StateMachineError};

/// Snapshot of the full item record as the stage workers expect it.
///
/// Workers act on this without re-querying the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: i64,
    pub tid: i64,
    pub filename: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub media_type: u8,
    pub url: String,
    pub voice_url: Option<String>,
    pub clear_url: Option<String>,
    pub is_extract: bool,
    pub is_clear: bool,
    pub fast_status: bool,
    pub transcribe_status: bool,
    pub effective_voice: Option<f64>,
    pub total_voice: Option<f64>,
    pub language: Option<String>,
    pub text_info: Option<String>,
    pub error_msg: Option<String>,
    pub retry_count: i32,
    pub step: u8,
}

impl From<&Item> for TaskInfo {
    fn from(item: &Item) -> Self {
        let progress = item.progress();
        Self {
            id: item.item_id,
            tid: item.task_id,
            filename: item.filename.clone(),
            size: item.size_bytes,
            media_type: item.media_kind.code(),
            url: item.source_url.clone(),
            voice_url: item.voice_url.clone(),
            clear_url: item.clear_url.clone(),
            is_extract: progress.extracted,
            is_clear: progress.denoised,
            fast_status: progress.fast_recognized,
            transcribe_status: progress.is_transcribed(),
            effective_voice: item.effective_voice_seconds,
            total_voice: item.total_voice_seconds,
            language: item.language.clone(),
            text_info: item.transcript.clone(),
            error_msg: item.error_message.clone(),
            retry_count: item.retry_count,
            step: item.step().code(),
        }
    }
}

/// Envelope metadata for a dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMetadata {
    /// Correlation id for tracing a dispatch through the worker
    pub message_id: Uuid,
    pub dispatched_at: DateTime<Utc>,
    pub retry_count: i32,
    /// Higher number = higher priority
    pub priority: u8,
}

/// Message published to a stage queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub task_info: TaskInfo,
    pub stage: StageAction,
    pub task_type: u8,
    pub metadata: DispatchMetadata,
}

impl DispatchMessage {
    /// Build the envelope for `item` going to `stage`
    pub fn new(item: &Item, stage: StageAction, priority: u8) -> Self {
        Self {
            task_info: TaskInfo::from(item),
            stage,
            task_type: stage.task_type_code(),
            metadata: DispatchMetadata {
                message_id: Uuid::new_v4(),
                dispatched_at: Utc::now(),
                retry_count: item.retry_count,
                priority,
            },
        }
    }

    /// Queue this message is published to
    pub fn queue_name(&self) -> &'static str {
        self.stage.queue_name()
    }

    /// Convert to JSON for the broker
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Create from a broker payload
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Render a stage field that may arrive as a name or a numeric code
pub fn raw_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Report posted by a stage worker.
///
/// Aliases accept the worker's own names (`task_id`, `task_type`, `status`).
/// `stage` stays raw so the audit trail keeps exactly what was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRequest {
    #[serde(default, alias = "task_id")]
    pub item_id: Option<i64>,
    #[serde(default, alias = "task_type")]
    pub stage: Value,
    #[serde(default, alias = "status")]
    pub outcome: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl CallbackRequest {
    pub fn new(item_id: i64, stage: StageAction, outcome: CallbackOutcome) -> Self {
        Self {
            item_id: Some(item_id),
            stage: Value::String(stage.as_str().to_string()),
            outcome: outcome.as_str().to_string(),
            message: None,
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Stage exactly as received, for the audit trail
    pub fn stage_label(&self) -> String {
        raw_label(&self.stage)
    }

    pub fn parse_stage(&self) -> Result<StageAction, StateMachineError> {
        self.stage_label().parse()
    }

    pub fn parse_outcome(&self) -> Result<CallbackOutcome, StateMachineError> {
        self.outcome.parse()
    }

    /// Raw request as JSON for the audit payload
    pub fn to_audit_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Look up a field in `data`
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|d| d.get(key))
            .filter(|v| !v.is_null())
    }

    /// Non-empty string field from `data`
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data_field(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Numeric field from `data`; numeric strings are accepted
    pub fn data_f64(&self, key: &str) -> Option<f64> {
        match self.data_field(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
