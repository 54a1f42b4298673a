//! # Status Aggregator
//!
//! Keeps a task's roll-up status equal to a pure function of its items.
//!
//! ## Decision Order
//!
//! First match wins:
//! 1. no items → `Empty`
//! 2. any item pending or in flight → `Processing`
//! 3. every item transcribed → `Transcribed`
//! 4. any item fast-recognized or transcribed → `Checked`
//! 5. otherwise → `Empty`
//!
//! Recomputation is serialized per task with a keyed lock, and the status
//! write is a compare-and-swap on the status that was read, so a concurrent
//! pause (or any other writer) forces a re-read instead of being overwritten.
//! Tasks in `Paused` are left alone.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::locks::KeyedLocks;
use crate::database::PipelineStore;
use crate::error::{PipelineError, Result};
use crate::logging::log_task_operation;
use crate::models::Item;
use crate::state_machine::TaskStatus;

/// Result of one recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupResult {
    pub task_id: i64,
    pub previous: TaskStatus,
    pub status: TaskStatus,
}

impl RollupResult {
    pub fn changed(&self) -> bool {
        self.previous != self.status
    }
}

/// Roll-up status implied by `items`
pub fn compute_status(items: &[Item]) -> TaskStatus {
    if items.is_empty() {
        return TaskStatus::Empty;
    }
    if items.iter().any(|item| item.step().is_pending_for_rollup()) {
        return TaskStatus::Processing;
    }
    if items.iter().all(|item| item.progress().is_transcribed()) {
        return TaskStatus::Transcribed;
    }
    if items
        .iter()
        .any(|item| item.progress().fast_recognized || item.progress().is_transcribed())
    {
        return TaskStatus::Checked;
    }
    TaskStatus::Empty
}

#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn PipelineStore>,
    locks: Arc<KeyedLocks>,
    max_attempts: u32,
}

impl std::fmt::Debug for StatusAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusAggregator")
            .field("max_attempts", &self.max_attempts)
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn PipelineStore>, max_attempts: u32) -> Self {
        Self {
            store,
            locks: Arc::new(KeyedLocks::new()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Recompute and, if it differs, persist the roll-up of `task_id`
    #[instrument(skip(self))]
    pub async fn recompute(&self, task_id: i64) -> Result<RollupResult> {
        let _guard = self.locks.lock(task_id).await;

        for attempt in 1..=self.max_attempts {
            let task = self
                .store
                .find_task(task_id)
                .await?
                .ok_or_else(|| PipelineError::task_not_found(task_id))?;

            if task.status == TaskStatus::Paused {
                debug!(task_id, "Task paused, roll-up left untouched");
                return Ok(RollupResult {
                    task_id,
                    previous: task.status,
                    status: task.status,
                });
            }

            let items = self.store.items_for_task(task_id).await?;
            let status = compute_status(&items);
            let result = RollupResult {
                task_id,
                previous: task.status,
                status,
            };

            if !result.changed() {
                return Ok(result);
            }

            if self
                .store
                .compare_and_swap_task_status(task_id, task.status, status)
                .await?
            {
                info!(
                    task_id,
                    from = %task.status,
                    to = %status,
                    items = items.len(),
                    "📊 STATUS_AGGREGATOR: Task roll-up updated"
                );
                log_task_operation(
                    "recompute",
                    task_id,
                    &status.to_string(),
                    Some(&format!("from {}", task.status)),
                );
                return Ok(result);
            }

            debug!(task_id, attempt, "Task status changed underneath, recomputing");
        }

        Err(PipelineError::ConcurrentModification {
            entity: "task",
            id: task_id,
            attempts: self.max_attempts,
        })
    }

    /// Drop per-task locks that are no longer in use
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }
}
