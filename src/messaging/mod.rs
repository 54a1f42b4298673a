//! # Messaging Module
//!
//! Queue broker abstraction, dispatch and callback message formats, queue
//! topology, and the RabbitMQ and in-memory broker providers.

pub mod broker;
pub mod errors;
pub mod memory;
pub mod message;
pub mod rabbitmq;
pub mod topology;

pub use broker::QueueBroker;
pub use errors::{MessagingError, MessagingResult};
pub use memory::{InMemoryBroker, PublishedMessage};
pub use message::{raw_label, CallbackRequest, DispatchMessage, DispatchMetadata, TaskInfo};
pub use rabbitmq::RabbitMqBroker;
pub use topology::{BindingSpec, ExchangeSpec, QueueSpec, QueueTopology};
