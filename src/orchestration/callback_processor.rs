//! # Callback Processor
//!
//! Applies worker callbacks to items. Brokers deliver at least once, so the
//! same report can arrive several times and may race with new dispatches; the
//! processor classifies every callback before writing anything:
//!
//! | Disposition | When | Effect |
//! |---|---|---|
//! | `Applied` | result for the stage in flight, or a late result the failed or uploaded item could still accept | fields + step updated, roll-up recomputed |
//! | `Duplicate` | success for a stage already completed, or a repeated identical failure | nothing but the audit row |
//! | `Stale` | any other late result | a success records fields + progress with the step untouched; a failure leaves only the audit row |
//! | `Heartbeat` | `processing` report | `updated_at` refreshed |
//!
//! A late result never moves an item off a settled step, so redeliveries
//! after the item has moved on cannot roll it back or mark it done early.
//!
//! Every callback is audited first, including ones that are then rejected.
//! Item writes use the same compare-and-swap as dispatch; a lost swap
//! re-reads the item and classifies again.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::audit_log::AuditLog;
use super::continuation::ContinuationPolicy;
use super::dispatcher::{DispatchOptions, ItemDispatcher};
use super::status_aggregator::StatusAggregator;
use crate::constants::TRANSCRIPT_PLACEHOLDER;
use crate::database::PipelineStore;
use crate::error::{PipelineError, Result};
use crate::logging::{log_error, log_item_operation};
use crate::messaging::CallbackRequest;
use crate::models::Item;
use crate::state_machine::{can_start_from, gating_step, CallbackOutcome, ItemStep, StageAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackDisposition {
    Applied,
    Duplicate,
    Heartbeat,
    Stale,
}

/// Acknowledgement returned to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackAck {
    pub item_id: i64,
    pub stage: StageAction,
    pub outcome: CallbackOutcome,
    pub disposition: CallbackDisposition,
    /// Item step once the callback (and any continuation) settled
    pub step: ItemStep,
    pub error_message: Option<String>,
    /// Stage dispatched by the continuation policy, if any
    pub continued: Option<StageAction>,
}

impl CallbackAck {
    fn new(item: &Item, stage: StageAction, outcome: CallbackOutcome, disposition: CallbackDisposition) -> Self {
        Self {
            item_id: item.item_id,
            stage,
            outcome,
            disposition,
            step: item.step(),
            error_message: item.error_message.clone(),
            continued: None,
        }
    }

    /// The worker failure this callback recorded, if it recorded one
    pub fn worker_failure(&self) -> Option<PipelineError> {
        (self.outcome == CallbackOutcome::Failed && self.disposition == CallbackDisposition::Applied)
            .then(|| PipelineError::WorkerFailure {
                item_id: self.item_id,
                stage: self.stage.to_string(),
                message: self.error_message.clone().unwrap_or_default(),
            })
    }
}

enum Plan {
    Ignore(CallbackDisposition),
    Write {
        updated: Item,
        disposition: CallbackDisposition,
    },
}

#[derive(Clone)]
pub struct CallbackProcessor {
    store: Arc<dyn PipelineStore>,
    audit: AuditLog,
    aggregator: StatusAggregator,
    dispatcher: ItemDispatcher,
    continuation: ContinuationPolicy,
    max_cas_attempts: u32,
}

impl std::fmt::Debug for CallbackProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackProcessor")
            .field("continuation", &self.continuation)
            .field("max_cas_attempts", &self.max_cas_attempts)
            .finish()
    }
}

impl CallbackProcessor {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        audit: AuditLog,
        aggregator: StatusAggregator,
        dispatcher: ItemDispatcher,
        continuation: ContinuationPolicy,
        max_cas_attempts: u32,
    ) -> Self {
        Self {
            store,
            audit,
            aggregator,
            dispatcher,
            continuation,
            max_cas_attempts: max_cas_attempts.max(1),
        }
    }

    /// Audit, validate and apply one worker callback
    #[instrument(skip(self, request), fields(item_id = ?request.item_id, stage = %request.stage_label(), outcome = %request.outcome))]
    pub async fn handle(&self, request: CallbackRequest) -> Result<CallbackAck> {
        self.audit.record(&request).await;

        let item_id = request
            .item_id
            .ok_or_else(|| PipelineError::validation("callback is missing item_id"))?;
        let stage = request
            .parse_stage()
            .map_err(|e| PipelineError::validation(format!("invalid callback stage: {e}")))?;
        let outcome = request
            .parse_outcome()
            .map_err(|e| PipelineError::validation(format!("invalid callback outcome: {e}")))?;
        if outcome == CallbackOutcome::Success {
            require_success_fields(stage, &request)?;
        }

        for attempt in 1..=self.max_cas_attempts {
            let item = self
                .store
                .find_item(item_id)
                .await?
                .ok_or_else(|| PipelineError::item_not_found(item_id))?;

            let (updated, disposition) = match plan(&item, stage, outcome, &request) {
                Plan::Ignore(disposition) => {
                    info!(
                        item_id,
                        stage = %stage,
                        step = %item.step(),
                        ?disposition,
                        "🔂 CALLBACK_PROCESSOR: Redelivered callback ignored"
                    );
                    return Ok(CallbackAck::new(&item, stage, outcome, disposition));
                }
                Plan::Write {
                    updated,
                    disposition,
                } => (updated, disposition),
            };

            let Some(stored) = self.store.compare_and_swap_item(&updated).await? else {
                debug!(item_id, attempt, "Item changed while applying callback, re-reading");
                continue;
            };

            return Ok(self.settle(stored, stage, outcome, disposition).await);
        }

        Err(PipelineError::ConcurrentModification {
            entity: "item",
            id: item_id,
            attempts: self.max_cas_attempts,
        })
    }

    async fn settle(
        &self,
        stored: Item,
        stage: StageAction,
        outcome: CallbackOutcome,
        disposition: CallbackDisposition,
    ) -> CallbackAck {
        let mut ack = CallbackAck::new(&stored, stage, outcome, disposition);

        if disposition == CallbackDisposition::Heartbeat {
            debug!(item_id = stored.item_id, stage = %stage, "Heartbeat recorded");
            return ack;
        }

        info!(
            item_id = stored.item_id,
            task_id = stored.task_id,
            stage = %stage,
            outcome = %outcome,
            ?disposition,
            step = %stored.step(),
            retry_count = stored.retry_count,
            "📨 CALLBACK_PROCESSOR: Callback applied"
        );
        log_item_operation(
            "callback",
            stored.item_id,
            Some(stored.task_id),
            Some(stage.as_str()),
            &stored.step().to_string(),
            stored.error_message.as_deref(),
        );

        if let Err(e) = self.aggregator.recompute(stored.task_id).await {
            log_error(
                "callback_processor",
                "recompute",
                &e.to_string(),
                Some(&format!("task_id={}", stored.task_id)),
            );
        }

        if outcome == CallbackOutcome::Success && disposition == CallbackDisposition::Applied {
            if let Some((next, step)) = self.continue_item(&stored, stage).await {
                ack.continued = Some(next);
                ack.step = step;
            }
        }
        ack
    }

    /// Dispatch the next stage if the continuation policy asks for one
    async fn continue_item(&self, item: &Item, completed: StageAction) -> Option<(StageAction, ItemStep)> {
        if self.continuation == ContinuationPolicy::Manual {
            return None;
        }

        let flow = match self.store.find_task(item.task_id).await {
            Ok(task) => task.and_then(|t| t.flow),
            Err(e) => {
                warn!(task_id = item.task_id, error = %e, "Could not load task for continuation");
                return None;
            }
        };
        let next = self.continuation.next_stage(completed, item, flow)?;

        match self
            .dispatcher
            .dispatch(item.item_id, next, DispatchOptions::default())
            .await
        {
            Ok(receipt) => {
                info!(
                    item_id = item.item_id,
                    from = %completed,
                    to = %next,
                    "➡️ CALLBACK_PROCESSOR: Continued to next stage"
                );
                Some((next, receipt.step))
            }
            Err(e) => {
                warn!(
                    item_id = item.item_id,
                    stage = %next,
                    error = %e,
                    "Continuation dispatch failed; callback still acknowledged"
                );
                None
            }
        }
    }
}

/// Classify a callback against the current item and build the write, if any
fn plan(item: &Item, stage: StageAction, outcome: CallbackOutcome, request: &CallbackRequest) -> Plan {
    let step = item.step();
    match outcome {
        CallbackOutcome::Processing => Plan::Write {
            updated: item.clone(),
            disposition: CallbackDisposition::Heartbeat,
        },
        CallbackOutcome::Success => {
            let disposition = if step.in_flight_stage() == Some(stage) {
                CallbackDisposition::Applied
            } else if item.progress().has_completed(stage) {
                return Plan::Ignore(CallbackDisposition::Duplicate);
            } else if accepts_late_result(item, stage) {
                CallbackDisposition::Applied
            } else {
                CallbackDisposition::Stale
            };

            let mut updated = item.clone();
            apply_success_fields(&mut updated, stage, request);
            if disposition == CallbackDisposition::Applied {
                updated.state = item.state.complete(stage);
                updated.error_message = None;
            } else {
                updated.state = item.state.record_out_of_band(stage);
            }
            Plan::Write {
                updated,
                disposition,
            }
        }
        CallbackOutcome::Failed => {
            let message = request
                .message
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{stage} failed"));

            if step == ItemStep::Failed && item.error_message.as_deref() == Some(message.as_str()) {
                return Plan::Ignore(CallbackDisposition::Duplicate);
            }
            if step.in_flight_stage() != Some(stage) && !accepts_late_result(item, stage) {
                return Plan::Ignore(CallbackDisposition::Stale);
            }

            let mut updated = item.clone();
            updated.state = item.state.fail();
            updated.retry_count += 1;
            updated.error_message = Some(message);
            Plan::Write {
                updated,
                disposition: CallbackDisposition::Applied,
            }
        }
    }
}

/// A result for a stage that is not in flight lands only on an item that is
/// failed or untouched and could start that stage right now
fn accepts_late_result(item: &Item, stage: StageAction) -> bool {
    matches!(item.step(), ItemStep::Failed | ItemStep::Uploaded)
        && can_start_from(stage, gating_step(item, stage))
}

fn require_success_fields(stage: StageAction, request: &CallbackRequest) -> Result<()> {
    let required = match stage {
        StageAction::Extract => Some("voice_url"),
        StageAction::Clear => Some("clear_url"),
        StageAction::Fast | StageAction::Transcribe => None,
    };
    match required {
        Some(field) if request.data_str(field).is_none() => Err(PipelineError::validation(format!(
            "{stage} success callback requires data.{field}"
        ))),
        _ => Ok(()),
    }
}

/// Copy the stage's result fields onto `item`; absent fields keep their value
fn apply_success_fields(item: &mut Item, stage: StageAction, request: &CallbackRequest) {
    if let Some(total) = request
        .data_f64("total_voice")
        .or_else(|| request.data_f64("duration"))
    {
        item.total_voice_seconds = Some(total);
    }

    match stage {
        StageAction::Extract => {
            item.voice_url = request.data_str("voice_url").map(str::to_string);
        }
        StageAction::Clear => {
            item.clear_url = request.data_str("clear_url").map(str::to_string);
        }
        StageAction::Fast => {
            if let Some(effective) = request.data_f64("effective_voice") {
                item.effective_voice_seconds = Some(effective);
            }
        }
        StageAction::Transcribe => {
            if let Some(effective) = request.data_f64("effective_voice") {
                item.effective_voice_seconds = Some(effective);
            }
            if let Some(language) = request.data_str("language") {
                item.language = Some(language.to_string());
            }
            match normalize_transcript(
                request.data_field("text_info"),
                request.data_field("transcribe_details"),
            ) {
                Ok(Some(transcript)) => item.transcript = Some(transcript),
                Ok(None) => {}
                Err(e) => {
                    log_error(
                        "callback_processor",
                        "normalize_transcript",
                        &e.to_string(),
                        Some(&format!("item_id={}", item.item_id)),
                    );
                    item.transcript = Some(TRANSCRIPT_PLACEHOLDER.to_string());
                }
            }
        }
    }
}

/// Persistable transcript text.
///
/// Plain text is kept as-is. Structured transcripts, and any transcript that
/// comes with `transcribe_details`, become one JSON document with keys sorted
/// at every level so identical input always produces identical text.
pub fn normalize_transcript(
    text_info: Option<&Value>,
    details: Option<&Value>,
) -> serde_json::Result<Option<String>> {
    let document = match (text_info, details) {
        (None, None) => return Ok(None),
        (Some(Value::String(text)), None) => return Ok(Some(text.clone())),
        (Some(Value::Object(fields)), Some(details)) => {
            let mut fields = fields.clone();
            fields.insert("transcribe_details".to_string(), details.clone());
            Value::Object(fields)
        }
        (Some(text), Some(details)) => json!({ "text": text, "transcribe_details": details }),
        (None, Some(details)) => json!({ "transcribe_details": details }),
        (Some(structured), None) => structured.clone(),
    };
    serde_json::to_string(&sorted_keys(document)).map(Some)
}

fn sorted_keys(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let sorted: BTreeMap<String, Value> = fields
                .into_iter()
                .map(|(key, value)| (key, sorted_keys(value)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(values) => Value::Array(values.into_iter().map(sorted_keys).collect()),
        other => other,
    }
}
