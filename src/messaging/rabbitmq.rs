//! # RabbitMQ Broker (management HTTP API)
//!
//! Publishes through the RabbitMQ management plugin rather than AMQP, which is
//! how the deployed stage workers' producers have always talked to the broker.
//!
//! - Publishing goes to the default exchange with the queue name as routing key
//! - Messages are persistent (`delivery_mode = 2`) and carry the dispatch priority
//! - A publish the broker did not route is an error, never a silent drop

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::broker::QueueBroker;
use super::errors::{MessagingError, MessagingResult};
use super::topology::QueueTopology;
use crate::config::BrokerConfig;
use crate::constants::queues;

#[derive(Clone)]
pub struct RabbitMqBroker {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
    vhost: String,
    default_priority: u8,
    max_priority: u8,
}

impl std::fmt::Debug for RabbitMqBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqBroker")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("vhost", &self.vhost)
            .finish()
    }
}

impl RabbitMqBroker {
    pub fn new(config: &BrokerConfig) -> MessagingResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            MessagingError::configuration("broker", format!("Invalid base URL: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(MessagingError::configuration(
                "broker",
                format!("Base URL cannot carry a path: {}", config.base_url),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(format!("media-pipeline/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                MessagingError::configuration("broker", format!("Failed to create HTTP client: {e}"))
            })?;

        let max_priority = u8::try_from(config.max_priority).unwrap_or(u8::MAX);
        let default_priority = u8::try_from(config.default_priority)
            .unwrap_or(max_priority)
            .min(max_priority);

        info!(
            base_url = %config.base_url,
            vhost = %config.vhost,
            timeout_seconds = config.timeout_seconds,
            "Created RabbitMQ management API broker"
        );

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            vhost: config.vhost.clone(),
            default_priority,
            max_priority,
        })
    }

    /// `/api/<segments...>` with each segment percent-encoded (vhost `/` becomes `%2F`)
    fn api_url(&self, segments: &[&str]) -> MessagingResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                MessagingError::configuration("broker", "Base URL cannot carry a path")
            })?;
            path.pop_if_empty().push("api");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        operation: &str,
        url: Url,
        body: Option<&Value>,
    ) -> MessagingResult<Value> {
        debug!(%method, %url, operation, "RabbitMQ API request");

        let mut builder = self
            .client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MessagingError::Authentication {
                message: format!("{operation}: {text}"),
            });
        }
        if !status.is_success() {
            let reason = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| {
                    v.get("reason")
                        .or_else(|| v.get("error"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(text);
            return Err(MessagingError::http_status(operation, status.as_u16(), reason));
        }

        if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            Ok(serde_json::from_str(&text)?)
        }
    }

    /// Whether the management API answers `/api/overview`
    pub async fn is_alive(&self) -> bool {
        let url = match self.api_url(&["overview"]) {
            Ok(url) => url,
            Err(_) => return false,
        };
        match self.request(Method::GET, "overview", url, None).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "RabbitMQ management API not reachable");
                false
            }
        }
    }

    /// Declare every exchange, queue and binding of `topology`; idempotent
    pub async fn provision(&self, topology: &QueueTopology) -> MessagingResult<()> {
        info!(
            exchanges = topology.exchanges.len(),
            queues = topology.queues.len(),
            "🐇 Provisioning RabbitMQ topology"
        );

        for exchange in &topology.exchanges {
            let url = self.api_url(&["exchanges", &self.vhost, &exchange.name])?;
            let body = json!({
                "type": exchange.kind,
                "durable": exchange.durable,
                "auto_delete": exchange.auto_delete,
                "internal": false,
                "arguments": {},
            });
            self.request(Method::PUT, "declare_exchange", url, Some(&body))
                .await?;
            debug!(exchange = %exchange.name, "Exchange declared");
        }

        for queue in &topology.queues {
            validate_queue_name(&queue.name)?;
            let url = self.api_url(&["queues", &self.vhost, &queue.name])?;
            let body = json!({
                "durable": queue.durable,
                "auto_delete": queue.auto_delete,
                "arguments": queue.arguments,
            });
            self.request(Method::PUT, "declare_queue", url, Some(&body))
                .await?;
            debug!(queue = %queue.name, "Queue declared");
        }

        for binding in &topology.bindings {
            let url = self.api_url(&[
                "bindings",
                &self.vhost,
                "e",
                &binding.exchange,
                "q",
                &binding.queue,
            ])?;
            let body = json!({ "routing_key": binding.routing_key, "arguments": {} });
            self.request(Method::POST, "bind_queue", url, Some(&body))
                .await?;
            debug!(
                exchange = %binding.exchange,
                queue = %binding.queue,
                routing_key = %binding.routing_key,
                "Binding declared"
            );
        }

        info!("✅ RabbitMQ topology provisioned");
        Ok(())
    }

    fn priority_of(&self, payload: &Value) -> u8 {
        payload
            .pointer("/metadata/priority")
            .and_then(Value::as_u64)
            .and_then(|p| u8::try_from(p).ok())
            .unwrap_or(self.default_priority)
            .min(self.max_priority)
    }
}

fn validate_queue_name(queue_name: &str) -> MessagingResult<()> {
    if queue_name.trim().is_empty() {
        return Err(MessagingError::invalid_queue_name(queue_name, "empty"));
    }
    if queue_name.len() > 255 {
        return Err(MessagingError::invalid_queue_name(
            queue_name,
            "longer than 255 bytes",
        ));
    }
    Ok(())
}

#[async_trait]
impl QueueBroker for RabbitMqBroker {
    async fn publish(&self, queue_name: &str, payload: &Value) -> MessagingResult<()> {
        validate_queue_name(queue_name)?;

        let url = self.api_url(&[
            "exchanges",
            &self.vhost,
            queues::DEFAULT_PUBLISH_EXCHANGE,
            "publish",
        ])?;
        let body = json!({
            "properties": {
                "delivery_mode": 2,
                "content_type": "application/json",
                "priority": self.priority_of(payload),
            },
            "routing_key": queue_name,
            "payload": serde_json::to_string(payload)?,
            "payload_encoding": "string",
        });

        let response = self.request(Method::POST, "publish", url, Some(&body)).await?;
        if response.get("routed").and_then(Value::as_bool) == Some(false) {
            return Err(MessagingError::unroutable(queue_name));
        }

        debug!(queue = queue_name, "📤 Message published");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }

    async fn health_check(&self) -> MessagingResult<bool> {
        Ok(self.is_alive().await)
    }
}
