//! # In-Memory Store
//!
//! Thread-safe [`PipelineStore`] on DashMap. Compare-and-swap is done under
//! the shard write lock of the entry, so it is as atomic as the SQL version.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::PipelineStore;
use crate::error::{PipelineError, Result};
use crate::models::{AuditLogEntry, Item, NewAuditLogEntry, NewItem, NewTask, Task};
use crate::state_machine::{ItemStep, TaskStatus};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tasks: DashMap<i64, Task>,
    items: DashMap<i64, Item>,
    audit: Mutex<Vec<AuditLogEntry>>,
    next_task_id: AtomicI64,
    next_item_id: AtomicI64,
    next_audit_id: AtomicI64,
    task_status_writes: AtomicUsize,
    item_writes: AtomicUsize,
    fail_audit: AtomicBool,
    item_write_budget: Mutex<Option<usize>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful task status writes so far
    pub fn task_status_writes(&self) -> usize {
        self.task_status_writes.load(Ordering::SeqCst)
    }

    /// Successful item compare-and-swaps so far
    pub fn item_writes(&self) -> usize {
        self.item_writes.load(Ordering::SeqCst)
    }

    /// Make every audit append fail until switched off
    pub fn set_fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Let `count` more item writes through, then fail each one; `None` lifts the limit
    pub fn limit_item_writes(&self, count: Option<usize>) {
        *self.item_write_budget.lock() = count;
    }

    /// Overwrite an item's `updated_at`, e.g. to age it past the stall timeout
    pub fn backdate_item(&self, item_id: i64, updated_at: DateTime<Utc>) {
        if let Some(mut item) = self.items.get_mut(&item_id) {
            item.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl PipelineStore for InMemoryStore {
    async fn insert_task(&self, task: NewTask) -> Result<Task> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        let task = task.into_task(task_id, Utc::now());
        self.tasks.insert(task_id, task.clone());
        Ok(task)
    }

    async fn find_task(&self, task_id: i64) -> Result<Option<Task>> {
        Ok(self.tasks.get(&task_id).map(|t| t.clone()))
    }

    async fn insert_item(&self, item: NewItem) -> Result<Item> {
        if !self.tasks.contains_key(&item.task_id) {
            return Err(PipelineError::task_not_found(item.task_id));
        }
        let item_id = self.next_item_id.fetch_add(1, Ordering::SeqCst) + 1;
        let item = item.into_item(item_id, Utc::now());
        self.items.insert(item_id, item.clone());
        Ok(item)
    }

    async fn find_item(&self, item_id: i64) -> Result<Option<Item>> {
        Ok(self.items.get(&item_id).map(|i| i.clone()))
    }

    async fn items_for_task(&self, task_id: i64) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .items
            .iter()
            .filter(|entry| entry.task_id == task_id)
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by_key(|item| item.item_id);
        Ok(items)
    }

    async fn compare_and_swap_item(&self, item: &Item) -> Result<Option<Item>> {
        let Some(mut stored) = self.items.get_mut(&item.item_id) else {
            return Err(PipelineError::item_not_found(item.item_id));
        };
        if stored.lock_version != item.lock_version {
            return Ok(None);
        }
        match self.item_write_budget.lock().as_mut() {
            Some(0) => return Err(PipelineError::Database(sqlx::Error::PoolClosed)),
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        let mut updated = item.clone();
        updated.lock_version = item.lock_version + 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        self.item_writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(updated))
    }

    async fn compare_and_swap_task_status(
        &self,
        task_id: i64,
        expected: TaskStatus,
        new_status: TaskStatus,
    ) -> Result<bool> {
        let Some(mut task) = self.tasks.get_mut(&task_id) else {
            return Err(PipelineError::task_not_found(task_id));
        };
        if task.status != expected {
            return Ok(false);
        }
        task.status = new_status;
        task.updated_at = Utc::now();
        self.task_status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn append_audit(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(PipelineError::Database(sqlx::Error::PoolClosed));
        }
        let audit_id = self.next_audit_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = entry.into_entry(audit_id, Utc::now());
        self.audit.lock().push(entry.clone());
        Ok(entry)
    }

    async fn audit_entries_for_item(&self, item_id: i64) -> Result<Vec<AuditLogEntry>> {
        Ok(self
            .audit
            .lock()
            .iter()
            .filter(|e| e.item_id == Some(item_id))
            .cloned()
            .collect())
    }

    async fn find_items_in_steps(
        &self,
        steps: &[ItemStep],
        updated_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .items
            .iter()
            .filter(|entry| steps.contains(&entry.step()) && entry.updated_at < updated_before)
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by_key(|item| (item.updated_at, item.item_id));
        items.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(items)
    }
}
