//! # Persistence
//!
//! The pipeline core only talks to storage through [`PipelineStore`]. Every
//! item write is an optimistic compare-and-swap on `lock_version`, which is
//! what closes the read-then-write race between concurrent dispatches and
//! callbacks for the same item.
//!
//! ## Key Components
//!
//! - [`memory`] - DashMap-backed store for tests and embedders
//! - [`postgres`] - SQLx store with embedded migrations (feature `postgres`)

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{AuditLogEntry, Item, NewAuditLogEntry, NewItem, NewTask, Task};
use crate::state_machine::{ItemStep, TaskStatus};

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::{PgStore, MIGRATOR};

#[async_trait]
pub trait PipelineStore: Send + Sync + 'static {
    async fn insert_task(&self, task: NewTask) -> Result<Task>;

    async fn find_task(&self, task_id: i64) -> Result<Option<Task>>;

    async fn insert_item(&self, item: NewItem) -> Result<Item>;

    async fn find_item(&self, item_id: i64) -> Result<Option<Item>>;

    /// Items of one task ordered by id
    async fn items_for_task(&self, task_id: i64) -> Result<Vec<Item>>;

    /// Persist `item` if the stored `lock_version` still equals `item.lock_version`.
    ///
    /// Returns the stored record (version bumped, `updated_at` refreshed), or
    /// `None` when another writer got there first.
    async fn compare_and_swap_item(&self, item: &Item) -> Result<Option<Item>>;

    /// Set a task's status if it is still `expected`; returns whether a row changed
    async fn compare_and_swap_task_status(
        &self,
        task_id: i64,
        expected: TaskStatus,
        new_status: TaskStatus,
    ) -> Result<bool>;

    async fn append_audit(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry>;

    /// Audit entries for one item, oldest first
    async fn audit_entries_for_item(&self, item_id: i64) -> Result<Vec<AuditLogEntry>>;

    /// Items in any of `steps` last touched before `updated_before`, oldest first
    async fn find_items_in_steps(
        &self,
        steps: &[ItemStep],
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Item>>;
}
