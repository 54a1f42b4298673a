//! # Queue Topology
//!
//! Declarative description of the exchanges, queues and bindings the stage
//! workers rely on. Provisioning is a one-time startup concern; the topology
//! itself is plain data so it can be inspected and tested without a broker.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::BrokerConfig;
use crate::constants::queues;
use crate::state_machine::StageAction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub durable: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingSpec {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueTopology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl QueueTopology {
    /// Main direct exchange with one queue per stage, plus dead-letter routing
    pub fn from_config(config: &BrokerConfig) -> Self {
        let dlx = queues::dead_letter_exchange(&config.exchange);
        let dlq = queues::dead_letter_queue(&config.exchange);

        let direct = |name: &str| ExchangeSpec {
            name: name.to_string(),
            kind: "direct".to_string(),
            durable: true,
            auto_delete: false,
        };

        let mut stage_queues = Vec::with_capacity(StageAction::ALL.len() + 1);
        let mut bindings = Vec::with_capacity(StageAction::ALL.len() + 1);
        for action in StageAction::ALL {
            let rule = action.rule();
            let mut arguments = Map::new();
            arguments.insert("x-message-ttl".into(), json!(config.message_ttl_ms));
            arguments.insert("x-max-priority".into(), json!(config.max_priority));
            arguments.insert("x-dead-letter-exchange".into(), json!(dlx));
            arguments.insert(
                "x-dead-letter-routing-key".into(),
                json!(config.dead_letter_routing_key),
            );
            stage_queues.push(QueueSpec {
                name: rule.queue.to_string(),
                durable: true,
                auto_delete: false,
                arguments,
            });
            bindings.push(BindingSpec {
                exchange: config.exchange.clone(),
                queue: rule.queue.to_string(),
                routing_key: rule.routing_key.to_string(),
            });
        }

        stage_queues.push(QueueSpec {
            name: dlq.clone(),
            durable: true,
            auto_delete: false,
            arguments: Map::new(),
        });
        bindings.push(BindingSpec {
            exchange: dlx.clone(),
            queue: dlq,
            routing_key: config.dead_letter_routing_key.clone(),
        });

        Self {
            exchanges: vec![direct(&config.exchange), direct(&dlx)],
            queues: stage_queues,
            bindings,
        }
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn queue_names(&self) -> Vec<&str> {
        self.queues.iter().map(|q| q.name.as_str()).collect()
    }
}
