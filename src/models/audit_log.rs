//! # Audit Log Entry
//!
//! Immutable record of one inbound worker callback. Entries are never read
//! back by the pipeline itself; they exist for troubleshooting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messaging::CallbackRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub audit_id: i64,
    /// As received; may reference an item that does not exist
    pub item_id: Option<i64>,
    pub stage: String,
    pub outcome: String,
    pub message: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditLogEntry {
    pub item_id: Option<i64>,
    pub stage: String,
    pub outcome: String,
    pub message: Option<String>,
    pub payload: Value,
}

impl NewAuditLogEntry {
    /// Entry for `request` exactly as received
    pub fn from_request(request: &CallbackRequest) -> Self {
        Self {
            item_id: request.item_id,
            stage: request.stage_label(),
            outcome: request.outcome.clone(),
            message: request.message.clone(),
            payload: request.to_audit_payload(),
        }
    }

    pub fn into_entry(self, audit_id: i64, created_at: DateTime<Utc>) -> AuditLogEntry {
        AuditLogEntry {
            audit_id,
            item_id: self.item_id,
            stage: self.stage,
            outcome: self.outcome,
            message: self.message,
            payload: self.payload,
            created_at,
        }
    }
}
