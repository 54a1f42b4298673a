//! # Queue Broker Trait
//!
//! Provider-agnostic publish capability consumed by the dispatcher.

use async_trait::async_trait;
use serde_json::Value;

use super::errors::MessagingResult;

/// Durable message queue the stage workers consume from.
///
/// Implementations publish one JSON payload to one named queue. Delivery is
/// at-least-once; a returned `Ok` means the broker accepted and routed the
/// message.
#[async_trait]
pub trait QueueBroker: Send + Sync + 'static {
    /// Publish `payload` to `queue_name`
    async fn publish(&self, queue_name: &str, payload: &Value) -> MessagingResult<()>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;

    /// Whether the broker is reachable
    async fn health_check(&self) -> MessagingResult<bool> {
        Ok(true)
    }
}
