//! # Audit Log
//!
//! Append-only trace of every inbound worker callback, written before the
//! callback is validated so malformed and unknown-item reports are kept too.
//! A failed append is logged and swallowed.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::PipelineStore;
use crate::error::Result;
use crate::logging::log_error;
use crate::messaging::CallbackRequest;
use crate::models::{AuditLogEntry, NewAuditLogEntry};

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn PipelineStore>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

impl AuditLog {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    /// Record `request` exactly as received; `None` if the append failed
    pub async fn record(&self, request: &CallbackRequest) -> Option<AuditLogEntry> {
        match self
            .store
            .append_audit(NewAuditLogEntry::from_request(request))
            .await
        {
            Ok(entry) => {
                debug!(
                    audit_id = entry.audit_id,
                    item_id = ?entry.item_id,
                    stage = %entry.stage,
                    outcome = %entry.outcome,
                    "Callback audited"
                );
                Some(entry)
            }
            Err(e) => {
                warn!(item_id = ?request.item_id, error = %e, "Audit append failed, continuing");
                log_error(
                    "audit_log",
                    "record",
                    &e.to_string(),
                    Some(&format!("item_id={:?}", request.item_id)),
                );
                None
            }
        }
    }

    /// Entries for one item, oldest first
    pub async fn entries_for_item(&self, item_id: i64) -> Result<Vec<AuditLogEntry>> {
        self.store.audit_entries_for_item(item_id).await
    }
}
