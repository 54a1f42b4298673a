#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Media Pipeline Core
//!
//! State machine, queue dispatch and callback aggregation for a multi-stage
//! media processing pipeline.
//!
//! ## Overview
//!
//! Uploaded media files (items) belong to a task and move independently
//! through up to four stages run by external workers:
//!
//! ```text
//! extract (video only) → clear (denoise) → fast recognition → transcribe
//! ```
//!
//! This crate owns the item lifecycle. It decides which stage an item may go
//! to next, publishes it to the stage's queue, applies the callbacks workers
//! send back, and keeps every task's roll-up status consistent with its items.
//!
//! ## Key Properties
//!
//! - **Atomic claims**: every item write is a compare-and-swap on
//!   `lock_version`, so concurrent dispatches of one item publish once
//! - **Idempotent callbacks**: redelivered reports are recognized and ignored
//! - **Derived roll-up**: task status is recomputed, never hand-set
//! - **Stall recovery**: a sweeper re-publishes or fails items whose worker
//!   went silent
//!
//! ## Module Organization
//!
//! - [`state_machine`] - steps, stages, transition table and dispatch guards
//! - [`models`] - tasks, items and audit entries
//! - [`database`] - persistence trait with in-memory and PostgreSQL stores
//! - [`messaging`] - broker trait, message formats, RabbitMQ provider
//! - [`orchestration`] - dispatcher, callback processor, aggregator, sweeper
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup
//! - [`upload`] - upload extension allow-list
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use media_pipeline::config::PipelineConfig;
//! use media_pipeline::database::PipelineStore;
//! use media_pipeline::models::{MediaKind, NewItem, NewTask};
//! use media_pipeline::orchestration::{DispatchOptions, PipelineSystem};
//! use media_pipeline::state_machine::StageAction;
//!
//! # async fn example() -> media_pipeline::Result<()> {
//! let (system, store, _broker) = PipelineSystem::in_memory(PipelineConfig::default());
//!
//! let task = store.insert_task(NewTask::new(1, "interviews")).await?;
//! let item = system
//!     .register_item(NewItem::new(task.task_id, "a.wav", MediaKind::Audio, "https://files/a.wav"))
//!     .await?;
//!
//! let receipt = system
//!     .dispatcher()
//!     .dispatch(item.item_id, StageAction::Clear, DispatchOptions::default())
//!     .await?;
//! println!("published to {}", receipt.queue_name);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests; PostgreSQL tests need DATABASE_URL and --ignored
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod upload;

pub use config::{ConfigManager, ConfigurationError, PipelineConfig};
pub use database::{InMemoryStore, PipelineStore};
pub use error::{PipelineError, Result};
pub use messaging::{CallbackRequest, InMemoryBroker, MessagingError, QueueBroker, RabbitMqBroker};
pub use models::{Item, MediaKind, NewItem, NewTask, Task, TaskFlow};
pub use orchestration::{
    CallbackAck, CallbackDisposition, ContinuationPolicy, DispatchOptions, DispatchRequest,
    PipelineSystem,
};
pub use state_machine::{ItemStep, StageAction, TaskStatus};
