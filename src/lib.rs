//! # workq
//!
//! Durable work queues with lease-based claiming.
//!
//! Producers enqueue JSON payloads (deduplicated by key); workers claim the
//! highest-priority ready item, hold it under a time-bounded lease, and report
//! an [`Outcome`](model::Outcome). Failures retry with linear backoff until
//! the attempt limit, then land in the dead letter state. A lease monitor
//! returns items held by silent workers to the queue.
//!
//! State lives behind the [`WorkStore`](store::WorkStore) trait: Postgres
//! ([`db::Db`]) in production, [`MemoryStore`](store::MemoryStore) for tests.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod policy;
pub mod queue;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
pub use queue::{Claimed, Job, WorkQueue};
