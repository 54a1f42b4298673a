//! # In-Memory Broker
//!
//! Records every publish for inspection. Used by tests and by embedders that
//! drive the pipeline without a running broker.
//!
//! ## Features
//!
//! - **Failure Injection**: fail the next N publishes, or every publish to a queue
//! - **Publish Delay**: widen race windows in concurrency tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::broker::QueueBroker;
use super::errors::{MessagingError, MessagingResult};

/// One accepted publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub queue_name: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InMemoryBroker {
    published: Mutex<Vec<PublishedMessage>>,
    failing_queues: Mutex<HashSet<String>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
    publish_delay: Mutex<Option<Duration>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publishes regardless of queue
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every publish to `queue_name` until [`Self::heal_queue`]
    pub fn fail_queue(&self, queue_name: &str) {
        self.failing_queues.lock().insert(queue_name.to_string());
    }

    pub fn heal_queue(&self, queue_name: &str) {
        self.failing_queues.lock().remove(queue_name);
    }

    /// Sleep this long inside every publish
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.publish_delay.lock() = delay;
    }

    /// All accepted publishes, oldest first
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Accepted publishes for one queue
    pub fn published_to(&self, queue_name: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.queue_name == queue_name)
            .cloned()
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    /// Publish calls including rejected ones
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    async fn publish(&self, queue_name: &str, payload: &Value) -> MessagingResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.publish_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_injected_failure() || self.failing_queues.lock().contains(queue_name) {
            return Err(MessagingError::queue_operation(
                queue_name,
                "publish",
                "injected failure",
            ));
        }

        self.published.lock().push(PublishedMessage {
            queue_name: queue_name.to_string(),
            payload: payload.clone(),
            published_at: Utc::now(),
        });
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
