//! Postgres-backed store: connection pool, migrations, and health check.
//!
//! Item transitions live in [`work`], worker liveness in [`worker`]; this
//! module wires both into the [`WorkStore`] trait.

pub mod work;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use crate::error::Result;
use crate::model::{
    EnqueueResult, Heartbeat, NewWorkItem, Outcome, QueueStats, WorkId, WorkItem,
    WorkerHeartbeat, WorkerStatus,
};
use crate::policy::RetryPolicy;
use crate::store::{ListFilter, Reclaimed, WorkStore};

/// Database handle. Owns the connection pool shared by every queue.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, 10).await
    }

    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkStore for Db {
    async fn enqueue(&self, new: NewWorkItem, now: DateTime<Utc>) -> Result<EnqueueResult> {
        self.enqueue_item(new, now).await
    }

    async fn claim(
        &self,
        queue_name: &str,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        self.claim_item(queue_name, worker_id, lease, now).await
    }

    async fn complete(
        &self,
        id: WorkId,
        worker_id: &str,
        outcome: &Outcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<WorkItem> {
        self.complete_item(id, worker_id, outcome, policy, now).await
    }

    async fn renew_lease(
        &self,
        id: WorkId,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.renew_item_lease(id, worker_id, lease, now).await
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reclaimed>> {
        self.reclaim_expired_items(now, limit).await
    }

    async fn get(&self, id: WorkId) -> Result<WorkItem> {
        self.get_item(id).await
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<WorkItem>> {
        self.list_items(filter).await
    }

    async fn stats(&self, queue_name: &str) -> Result<QueueStats> {
        self.queue_stats(queue_name).await
    }

    async fn requeue(
        &self,
        id: WorkId,
        extra_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<WorkItem> {
        self.requeue_item(id, extra_attempts, now).await
    }

    async fn purge(&self, queue_name: &str, before: DateTime<Utc>) -> Result<u64> {
        self.purge_items(queue_name, before).await
    }

    async fn register_worker(
        &self,
        worker_id: &str,
        hostname: &str,
        pid: u32,
        now: DateTime<Utc>,
    ) -> Result<WorkerHeartbeat> {
        self.upsert_worker(worker_id, hostname, pid, now).await
    }

    async fn heartbeat(&self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> Result<()> {
        self.record_heartbeat(heartbeat, now).await
    }

    async fn set_worker_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.update_worker_status(worker_id, status, now).await
    }

    async fn mark_dead_workers(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        self.mark_silent_workers_dead(cutoff).await
    }

    async fn get_worker(&self, worker_id: &str) -> Result<WorkerHeartbeat> {
        self.get_worker_row(worker_id).await
    }

    async fn list_workers(&self) -> Result<Vec<WorkerHeartbeat>> {
        self.list_worker_rows().await
    }
}
