//! End-to-end pipeline behavior on the in-memory store and broker.

mod concurrency;
mod dispatch;
mod scenarios;
mod sweeper;
