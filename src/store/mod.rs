//! Storage boundary for queue state.
//!
//! Every method is one atomic read-modify-write against the backing store.
//! Implementations must never split a transition into a separate read and
//! write; the gap between them is where two workers double-claim an item.
//!
//! Two backends: [`crate::db::Db`] (Postgres, row locks + `SKIP LOCKED`) and
//! [`MemoryStore`] (in-process, for tests and embedded use).

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::model::{
    EnqueueResult, Heartbeat, NewWorkItem, Outcome, QueueStats, Status, WorkId, WorkItem,
    WorkerHeartbeat, WorkerStatus,
};
use crate::policy::RetryPolicy;

/// Filter for operator listings.
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub queue_name: Option<String>,
    pub status: Option<Status>,
    pub limit: usize,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            queue_name: None,
            status: None,
            limit: 100,
        }
    }
}

/// An item the lease monitor took back from a silent worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclaimed {
    pub id: WorkId,
    pub queue_name: String,
    /// Worker whose lease ran out.
    pub claimed_by: Option<String>,
    /// `New` (requeued) or `Deadletter` (out of attempts).
    pub status: Status,
    pub attempt_count: u32,
}

#[async_trait]
pub trait WorkStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Work items
    // -----------------------------------------------------------------------

    /// Insert an item, or return the live item holding its dedupe key.
    /// Items that fail [`NewWorkItem::validate`] are refused with `InvalidArgument`.
    async fn enqueue(&self, new: NewWorkItem, now: DateTime<Utc>) -> Result<EnqueueResult>;

    /// Lease the best claimable item of `queue_name` to `worker_id`.
    /// `Ok(None)` when nothing is eligible. Leases under
    /// [`MIN_LEASE`](crate::policy::MIN_LEASE) are refused.
    async fn claim(
        &self,
        queue_name: &str,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>>;

    /// Resolve a running item owned by `worker_id`.
    /// `Err(StaleClaim)` without mutation if the caller lost the lease.
    async fn complete(
        &self,
        id: WorkId,
        worker_id: &str,
        outcome: &Outcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<WorkItem>;

    /// Push the lease of a running item owned by `worker_id` to `now + lease`.
    async fn renew_lease(
        &self,
        id: WorkId,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;

    /// Requeue or deadletter up to `limit` running items whose lease ended
    /// before `now`.
    async fn reclaim_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reclaimed>>;

    async fn get(&self, id: WorkId) -> Result<WorkItem>;

    /// Items matching `filter`, newest first.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<WorkItem>>;

    async fn stats(&self, queue_name: &str) -> Result<QueueStats>;

    /// Operator action: put a deadlettered item back in play with
    /// `extra_attempts` more tries.
    async fn requeue(&self, id: WorkId, extra_attempts: u32, now: DateTime<Utc>)
    -> Result<WorkItem>;

    /// Operator action: delete terminal items completed before `before`.
    async fn purge(&self, queue_name: &str, before: DateTime<Utc>) -> Result<u64>;

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    /// Create or reset the worker's row as `active`.
    async fn register_worker(
        &self,
        worker_id: &str,
        hostname: &str,
        pid: u32,
        now: DateTime<Utc>,
    ) -> Result<WorkerHeartbeat>;

    async fn heartbeat(&self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> Result<()>;

    async fn set_worker_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Mark workers silent since before `cutoff` as dead. Returns their ids.
    async fn mark_dead_workers(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;

    async fn get_worker(&self, worker_id: &str) -> Result<WorkerHeartbeat>;

    async fn list_workers(&self) -> Result<Vec<WorkerHeartbeat>>;
}
