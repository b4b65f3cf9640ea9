//! Core data model.
//!
//! A work item is a unit of queued work with a lease. A worker heartbeat is
//! the liveness record of the process that holds leases.

pub mod work;
pub mod worker;

pub use work::{
    DEFAULT_MAX_ATTEMPTS, EnqueueResult, NewWorkItem, Outcome, QueueStats, Status, WorkId,
    WorkItem,
};
pub use worker::{Heartbeat, WorkerHeartbeat, WorkerStats, WorkerStatus};
