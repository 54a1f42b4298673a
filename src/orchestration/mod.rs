//! # Orchestration
//!
//! The request-driven core of the pipeline. Nothing here blocks on a stage
//! worker: dispatch publishes and returns, and results come back later as
//! callbacks.
//!
//! ## Core Components
//!
//! - **ItemDispatcher**: claims an item for a stage and publishes it
//! - **CallbackProcessor**: applies worker reports idempotently
//! - **StatusAggregator**: keeps each task's roll-up in line with its items
//! - **AuditLog**: append-only record of every inbound callback
//! - **ContinuationPolicy**: whether a finished stage chains into the next one
//! - **StallSweeper**: recovers items whose worker never reported back
//! - **PipelineSystem**: wires all of the above to a store and a broker

pub mod audit_log;
pub mod bootstrap;
pub mod callback_processor;
pub mod continuation;
pub mod dispatcher;
pub mod locks;
pub mod stall_sweeper;
pub mod status_aggregator;

pub use audit_log::AuditLog;
pub use bootstrap::{PipelineSystem, SweeperHandle};
pub use callback_processor::{
    normalize_transcript, CallbackAck, CallbackDisposition, CallbackProcessor,
};
pub use continuation::ContinuationPolicy;
pub use dispatcher::{
    BatchDispatchSummary, DispatchOptions, DispatchReceipt, DispatchRequest, DispatchStatus,
    ItemDispatchResult, ItemDispatcher,
};
pub use locks::KeyedLocks;
pub use stall_sweeper::{StallAction, StallSweeper, SweepReport};
pub use status_aggregator::{compute_status, RollupResult, StatusAggregator};
