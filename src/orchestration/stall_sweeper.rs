//! # Stall Sweeper
//!
//! Workers report back asynchronously and nothing else notices a worker that
//! died mid-stage. The sweeper runs periodically and looks for:
//!
//! - **Stalled items** - in an in-flight step with no write (callback or
//!   heartbeat) for longer than `stall_timeout_seconds`. They are re-published
//!   for the same stage while the redispatch budget lasts, otherwise moved to
//!   `Failed`.
//! - **Unstarted uploads** (opt-in `auto_start`) - items still `Uploaded` are
//!   dispatched to their first stage through the normal guards.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use media_pipeline::orchestration::PipelineSystem;
//! # async fn example(system: PipelineSystem) {
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let sweeper = system.sweeper().clone();
//! let handle = tokio::spawn(async move { sweeper.run(shutdown_rx).await });
//!
//! // ... later
//! let _ = shutdown_tx.send(true);
//! let _ = handle.await;
//! # }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::dispatcher::{DispatchOptions, ItemDispatcher};
use super::status_aggregator::StatusAggregator;
use crate::config::SweeperConfig;
use crate::database::PipelineStore;
use crate::error::{PipelineError, Result};
use crate::logging::{log_error, log_item_operation};
use crate::models::Item;
use crate::state_machine::ItemStep;

/// What to do with an item stuck in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallAction {
    /// Re-publish for the same stage until the budget runs out
    #[default]
    Redispatch,
    MarkFailed,
}

/// Counters for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub stalled_found: usize,
    pub redispatched: usize,
    pub marked_failed: usize,
    pub auto_started: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct StallSweeper {
    store: Arc<dyn PipelineStore>,
    dispatcher: ItemDispatcher,
    aggregator: StatusAggregator,
    config: SweeperConfig,
}

impl std::fmt::Debug for StallSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StallSweeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StallSweeper {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        dispatcher: ItemDispatcher,
        aggregator: StatusAggregator,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            aggregator,
            config,
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Sweep until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_seconds = self.config.interval_seconds,
            stall_timeout_seconds = self.config.stall_timeout_seconds,
            stall_action = ?self.config.stall_action,
            auto_start = self.config.auto_start,
            "🧹 STALL_SWEEPER: Starting sweep loop"
        );

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(?report, "🧹 STALL_SWEEPER: Sweep finished");
                        }
                        Ok(_) => debug!("Sweep found nothing to do"),
                        Err(e) => log_error("stall_sweeper", "sweep_once", &e.to_string(), None),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("🛑 STALL_SWEEPER: Sweep loop stopped");
    }

    /// One pass over stalled and (optionally) unstarted items
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut touched_tasks = BTreeSet::new();

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stall_timeout())
                .map_err(|e| PipelineError::validation(format!("invalid stall timeout: {e}")))?;
        let stalled = self
            .store
            .find_items_in_steps(&ItemStep::IN_FLIGHT, cutoff, self.config.batch_size)
            .await?;
        report.stalled_found = stalled.len();

        for item in stalled {
            touched_tasks.insert(item.task_id);
            let redispatch = self.config.stall_action == StallAction::Redispatch
                && item.retry_count < self.config.max_redispatches;

            if redispatch {
                match self.dispatcher.republish_stalled(&item).await {
                    Ok(Some(_)) => report.redispatched += 1,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(item_id = item.item_id, error = %e, "Re-publish of stalled item failed");
                        report.errors += 1;
                    }
                }
            } else {
                match self.mark_stalled_failed(&item).await {
                    Ok(true) => report.marked_failed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(item_id = item.item_id, error = %e, "Could not fail stalled item");
                        report.errors += 1;
                    }
                }
            }
        }

        for task_id in touched_tasks {
            if let Err(e) = self.aggregator.recompute(task_id).await {
                log_error("stall_sweeper", "recompute", &e.to_string(), Some(&format!("task_id={task_id}")));
                report.errors += 1;
            }
        }

        if self.config.auto_start {
            self.auto_start(&mut report).await?;
        }

        self.aggregator.prune_locks();
        Ok(report)
    }

    async fn auto_start(&self, report: &mut SweepReport) -> Result<()> {
        let uploaded = self
            .store
            .find_items_in_steps(&[ItemStep::Uploaded], Utc::now(), self.config.batch_size)
            .await?;

        for item in uploaded {
            let stage = item.media_kind.first_stage();
            match self
                .dispatcher
                .dispatch(item.item_id, stage, DispatchOptions::default())
                .await
            {
                Ok(_) => report.auto_started += 1,
                Err(e) if e.is_rejection() => {
                    debug!(item_id = item.item_id, reason = %e, "Auto-start skipped");
                }
                Err(e) => {
                    warn!(item_id = item.item_id, error = %e, "Auto-start dispatch failed");
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// CAS the stalled snapshot to `Failed`; false if it moved on meanwhile
    async fn mark_stalled_failed(&self, item: &Item) -> Result<bool> {
        let reason = format!(
            "stalled in {} for more than {}s",
            item.step(),
            self.config.stall_timeout_seconds
        );
        let mut failed = item.clone();
        failed.state = item.state.fail();
        failed.retry_count += 1;
        failed.error_message = Some(reason.clone());

        let Some(stored) = self.store.compare_and_swap_item(&failed).await? else {
            debug!(item_id = item.item_id, "Stalled item changed before it could be failed");
            return Ok(false);
        };
        log_item_operation(
            "stall_failed",
            stored.item_id,
            Some(stored.task_id),
            item.step().in_flight_stage().map(|s| s.as_str()),
            &stored.step().to_string(),
            Some(&reason),
        );
        Ok(true)
    }
}
