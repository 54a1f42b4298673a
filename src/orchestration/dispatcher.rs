//! # Item Dispatcher
//!
//! ## Architecture: Claim, Then Publish
//!
//! Dispatching an item to a stage is a two-phase operation:
//!
//! 1. **Claim** - re-read the item, run the dispatch guards, and move it to the
//!    stage's in-flight step with a compare-and-swap on `lock_version`. When
//!    the swap loses a race the guards run again against the fresh record, so
//!    of two concurrent dispatches exactly one claims the item and the other
//!    is rejected as already processing.
//! 2. **Publish** - serialize the claimed record into a [`DispatchMessage`]
//!    and hand it to the [`QueueBroker`]. A failed publish moves the item to
//!    `Failed` (retry count bumped, reason recorded) and the transport error
//!    is returned to the caller.
//!
//! Either way the owning task's roll-up is recomputed afterwards, and so is
//! it when the guards reject the dispatch.
//!
//! ## Batch Dispatch
//!
//! [`ItemDispatcher::dispatch_batch`] expands item and task ids, dispatches
//! with bounded concurrency and reports one result per item. Only a
//! malformed request is rejected; per-item failures are part of the summary.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::status_aggregator::StatusAggregator;
use crate::config::DispatchConfig;
use crate::database::PipelineStore;
use crate::error::{PipelineError, Result};
use crate::logging::{log_error, log_item_operation};
use crate::messaging::{raw_label, DispatchMessage, QueueBroker};
use crate::models::Item;
use crate::state_machine::{check_dispatch, GuardOptions, ItemStep, StageAction};

/// Per-call dispatch switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Skip every guard; the claim is still atomic
    pub force: bool,
    /// Allow transcribing audio that was never denoised
    pub without_denoise: bool,
    /// Broker priority; the configured default when unset
    pub priority: Option<u8>,
}

impl DispatchOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn without_denoise() -> Self {
        Self {
            without_denoise: true,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    fn guard_options(&self) -> GuardOptions {
        GuardOptions {
            without_denoise: self.without_denoise,
        }
    }
}

/// What a successful dispatch did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    pub item_id: i64,
    pub task_id: i64,
    pub action: StageAction,
    pub queue_name: &'static str,
    /// Step after the claim
    pub step: ItemStep,
    pub message_id: Uuid,
}

/// Client request to dispatch items, or all items of tasks, to one stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub item_ids: Vec<i64>,
    #[serde(default)]
    pub task_ids: Vec<i64>,
    /// Stage name or task-type code
    #[serde(default, alias = "task_type")]
    pub action: Value,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub without_denoise: bool,
    #[serde(default)]
    pub priority: Option<u8>,
}

impl DispatchRequest {
    pub fn for_items(item_ids: impl Into<Vec<i64>>, action: StageAction) -> Self {
        Self {
            item_ids: item_ids.into(),
            action: Value::String(action.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn for_tasks(task_ids: impl Into<Vec<i64>>, action: StageAction) -> Self {
        Self {
            task_ids: task_ids.into(),
            action: Value::String(action.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_without_denoise(mut self) -> Self {
        self.without_denoise = true;
        self
    }

    /// Reject the request before anything is touched
    pub fn validate(&self) -> Result<StageAction> {
        if self.item_ids.is_empty() && self.task_ids.is_empty() {
            return Err(PipelineError::validation(
                "dispatch request needs at least one item_id or task_id",
            ));
        }
        let label = raw_label(&self.action);
        label
            .parse()
            .map_err(|_| PipelineError::validation(format!("unknown dispatch action '{label}'")))
    }

    pub fn options(&self) -> DispatchOptions {
        DispatchOptions {
            force: self.force,
            without_denoise: self.without_denoise,
            priority: self.priority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Success,
    Failed,
}

/// Outcome for one item of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemDispatchResult {
    /// `None` when a requested task could not be expanded
    pub item_id: Option<i64>,
    pub task_id: Option<i64>,
    pub status: DispatchStatus,
    pub queue_name: Option<&'static str>,
    pub message: String,
}

impl ItemDispatchResult {
    pub fn is_success(&self) -> bool {
        self.status == DispatchStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDispatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ItemDispatchResult>,
}

impl BatchDispatchSummary {
    fn from_results(results: Vec<ItemDispatchResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

enum BatchTarget {
    Item { item_id: i64, task_id: Option<i64> },
    Unexpanded { task_id: i64, reason: String },
}

#[derive(Clone)]
pub struct ItemDispatcher {
    store: Arc<dyn PipelineStore>,
    broker: Arc<dyn QueueBroker>,
    aggregator: StatusAggregator,
    config: DispatchConfig,
    default_priority: u8,
}

impl std::fmt::Debug for ItemDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemDispatcher")
            .field("broker", &self.broker.provider_name())
            .field("config", &self.config)
            .field("default_priority", &self.default_priority)
            .finish()
    }
}

impl ItemDispatcher {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        broker: Arc<dyn QueueBroker>,
        aggregator: StatusAggregator,
        config: DispatchConfig,
        default_priority: u8,
    ) -> Self {
        Self {
            store,
            broker,
            aggregator,
            config,
            default_priority,
        }
    }

    /// Claim `item_id` for `action` and publish it to the stage queue
    #[instrument(skip(self))]
    pub async fn dispatch(
        &self,
        item_id: i64,
        action: StageAction,
        options: DispatchOptions,
    ) -> Result<DispatchReceipt> {
        let claimed = self.claim(item_id, action, options).await?;
        let priority = options.priority.unwrap_or(self.default_priority);

        match self.publish(&claimed, action, priority).await {
            Ok(message_id) => {
                info!(
                    item_id,
                    task_id = claimed.task_id,
                    stage = %action,
                    queue = action.queue_name(),
                    %message_id,
                    forced = options.force,
                    "🚀 DISPATCHER: Item dispatched"
                );
                log_item_operation(
                    "dispatch",
                    item_id,
                    Some(claimed.task_id),
                    Some(action.as_str()),
                    &claimed.step().to_string(),
                    Some(action.queue_name()),
                );
                self.recompute(claimed.task_id).await;
                Ok(DispatchReceipt {
                    item_id,
                    task_id: claimed.task_id,
                    action,
                    queue_name: action.queue_name(),
                    step: claimed.step(),
                    message_id,
                })
            }
            Err(e) => {
                let reason = format!("dispatch to {} failed: {e}", action.queue_name());
                log_error("dispatcher", "publish", &e.to_string(), Some(&reason));
                if let Err(mark_err) = self.record_publish_failure(&claimed, action, &reason).await {
                    log_error(
                        "dispatcher",
                        "record_publish_failure",
                        &mark_err.to_string(),
                        Some(&format!("item_id={item_id}")),
                    );
                }
                self.recompute(claimed.task_id).await;
                Err(e)
            }
        }
    }

    /// Re-publish an item found stuck in flight, counting it as a retry.
    ///
    /// Returns `None` when the item changed since it was read.
    #[instrument(skip(self, item), fields(item_id = item.item_id))]
    pub async fn republish_stalled(&self, item: &Item) -> Result<Option<DispatchReceipt>> {
        let Some(action) = item.step().in_flight_stage() else {
            return Ok(None);
        };

        let mut retried = item.clone();
        retried.retry_count += 1;
        let Some(claimed) = self.store.compare_and_swap_item(&retried).await? else {
            debug!(item_id = item.item_id, "Stalled item changed before re-publish");
            return Ok(None);
        };

        match self.publish(&claimed, action, self.default_priority).await {
            Ok(message_id) => {
                info!(
                    item_id = claimed.item_id,
                    stage = %action,
                    retry_count = claimed.retry_count,
                    "🔁 DISPATCHER: Stalled item re-published"
                );
                Ok(Some(DispatchReceipt {
                    item_id: claimed.item_id,
                    task_id: claimed.task_id,
                    action,
                    queue_name: action.queue_name(),
                    step: claimed.step(),
                    message_id,
                }))
            }
            Err(e) => {
                let reason = format!("re-dispatch to {} failed: {e}", action.queue_name());
                log_error("dispatcher", "republish", &e.to_string(), Some(&reason));
                if let Err(mark_err) = self.record_publish_failure(&claimed, action, &reason).await {
                    log_error(
                        "dispatcher",
                        "record_publish_failure",
                        &mark_err.to_string(),
                        Some(&format!("item_id={}", claimed.item_id)),
                    );
                }
                self.recompute(claimed.task_id).await;
                Err(e)
            }
        }
    }

    /// Dispatch every item named by `request`.
    ///
    /// Fails only when the request itself is malformed.
    #[instrument(skip(self, request), fields(items = request.item_ids.len(), tasks = request.task_ids.len()))]
    pub async fn dispatch_batch(&self, request: DispatchRequest) -> Result<BatchDispatchSummary> {
        let action = request.validate()?;
        let options = request.options();
        let targets = self.expand(&request).await;

        let results: Vec<ItemDispatchResult> = stream::iter(targets)
            .map(|target| self.dispatch_target(target, action, options))
            .buffered(self.config.batch_concurrency.max(1))
            .collect()
            .await;

        let summary = BatchDispatchSummary::from_results(results);
        info!(
            stage = %action,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "📦 DISPATCHER: Batch dispatch finished"
        );
        Ok(summary)
    }

    async fn claim(&self, item_id: i64, action: StageAction, options: DispatchOptions) -> Result<Item> {
        for attempt in 1..=self.config.max_cas_attempts.max(1) {
            let item = self
                .store
                .find_item(item_id)
                .await?
                .ok_or_else(|| PipelineError::item_not_found(item_id))?;

            if !options.force {
                if let Err(guard) = check_dispatch(&item, action, options.guard_options()) {
                    info!(item_id, stage = %action, step = %item.step(), reason = %guard, "Dispatch rejected");
                    self.recompute(item.task_id).await;
                    return Err(guard.into());
                }
            }

            let mut claimed = item.clone();
            claimed.state = item.state.begin(action);
            claimed.error_message = None;

            if let Some(stored) = self.store.compare_and_swap_item(&claimed).await? {
                return Ok(stored);
            }
            debug!(item_id, attempt, "Lost claim race, re-checking guards");
        }

        Err(PipelineError::ConcurrentModification {
            entity: "item",
            id: item_id,
            attempts: self.config.max_cas_attempts,
        })
    }

    async fn publish(&self, item: &Item, action: StageAction, priority: u8) -> Result<Uuid> {
        let message = DispatchMessage::new(item, action, priority);
        let payload = message.to_json()?;
        self.broker.publish(message.queue_name(), &payload).await?;
        Ok(message.metadata.message_id)
    }

    /// Move a claimed item that never reached its queue to `Failed`
    async fn record_publish_failure(
        &self,
        claimed: &Item,
        action: StageAction,
        reason: &str,
    ) -> Result<()> {
        let in_flight = action.rule().in_flight;
        let mut current = claimed.clone();

        for _ in 0..self.config.max_cas_attempts.max(1) {
            if current.step() != in_flight {
                warn!(
                    item_id = current.item_id,
                    step = %current.step(),
                    "Item moved on before the publish failure was recorded"
                );
                return Ok(());
            }

            let mut failed = current.clone();
            failed.state = current.state.fail();
            failed.retry_count += 1;
            failed.error_message = Some(reason.to_string());

            if let Some(stored) = self.store.compare_and_swap_item(&failed).await? {
                log_item_operation(
                    "dispatch_failed",
                    stored.item_id,
                    Some(stored.task_id),
                    Some(action.as_str()),
                    &stored.step().to_string(),
                    Some(reason),
                );
                return Ok(());
            }

            current = self
                .store
                .find_item(claimed.item_id)
                .await?
                .ok_or_else(|| PipelineError::item_not_found(claimed.item_id))?;
        }

        Err(PipelineError::ConcurrentModification {
            entity: "item",
            id: claimed.item_id,
            attempts: self.config.max_cas_attempts,
        })
    }

    async fn recompute(&self, task_id: i64) {
        if let Err(e) = self.aggregator.recompute(task_id).await {
            log_error(
                "dispatcher",
                "recompute",
                &e.to_string(),
                Some(&format!("task_id={task_id}")),
            );
        }
    }

    async fn expand(&self, request: &DispatchRequest) -> Vec<BatchTarget> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for &item_id in &request.item_ids {
            if seen.insert(item_id) {
                targets.push(BatchTarget::Item {
                    item_id,
                    task_id: None,
                });
            }
        }

        for &task_id in &request.task_ids {
            let items = match self.store.find_task(task_id).await {
                Ok(Some(_)) => self.store.items_for_task(task_id).await,
                Ok(None) => Err(PipelineError::task_not_found(task_id)),
                Err(e) => Err(e),
            };
            match items {
                Ok(items) => targets.extend(
                    items
                        .into_iter()
                        .filter(|item| seen.insert(item.item_id))
                        .map(|item| BatchTarget::Item {
                            item_id: item.item_id,
                            task_id: Some(task_id),
                        }),
                ),
                Err(e) => targets.push(BatchTarget::Unexpanded {
                    task_id,
                    reason: e.to_string(),
                }),
            }
        }

        targets
    }

    async fn dispatch_target(
        &self,
        target: BatchTarget,
        action: StageAction,
        options: DispatchOptions,
    ) -> ItemDispatchResult {
        match target {
            BatchTarget::Unexpanded { task_id, reason } => ItemDispatchResult {
                item_id: None,
                task_id: Some(task_id),
                status: DispatchStatus::Failed,
                queue_name: None,
                message: reason,
            },
            BatchTarget::Item { item_id, task_id } => match self.dispatch(item_id, action, options).await {
                Ok(receipt) => ItemDispatchResult {
                    item_id: Some(item_id),
                    task_id: Some(receipt.task_id),
                    status: DispatchStatus::Success,
                    queue_name: Some(receipt.queue_name),
                    message: format!("dispatched to {}", receipt.queue_name),
                },
                Err(e) => ItemDispatchResult {
                    item_id: Some(item_id),
                    task_id,
                    status: DispatchStatus::Failed,
                    queue_name: None,
                    message: e.to_string(),
                },
            },
        }
    }
}
