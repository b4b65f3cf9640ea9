//! Worker liveness rows on Postgres.
//!
//! Every statement here touches `worker_heartbeats` only. None of them joins
//! into a work item transition.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Heartbeat, WorkId, WorkerHeartbeat, WorkerStats, WorkerStatus};

const COLUMNS: &str = "worker_id, hostname, pid, started_at, last_heartbeat_at, \
     items_processed, items_succeeded, items_failed, status, current_item_id";

impl super::Db {
    /// Create the worker's row, or reset it for a new incarnation.
    pub(crate) async fn upsert_worker(
        &self,
        worker_id: &str,
        hostname: &str,
        pid: u32,
        now: DateTime<Utc>,
    ) -> Result<WorkerHeartbeat> {
        let sql = format!(
            "INSERT INTO worker_heartbeats (worker_id, hostname, pid, started_at, last_heartbeat_at, status)
             VALUES ($1, $2, $3, $4, $4, 'active')
             ON CONFLICT (worker_id) DO UPDATE
             SET hostname = EXCLUDED.hostname, pid = EXCLUDED.pid,
                 started_at = EXCLUDED.started_at, last_heartbeat_at = EXCLUDED.last_heartbeat_at,
                 items_processed = 0, items_succeeded = 0, items_failed = 0,
                 status = 'active', current_item_id = NULL
             RETURNING {COLUMNS}"
        );
        let row: WorkerRow = sqlx::query_as(&sql)
            .bind(worker_id)
            .bind(hostname)
            .bind(i32::try_from(pid).unwrap_or(i32::MAX))
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        row.try_into_heartbeat()
    }

    /// Apply a heartbeat tick. Counters only move forward; a worker that was
    /// marked dead comes back as active.
    pub(crate) async fn record_heartbeat(
        &self,
        heartbeat: &Heartbeat,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE worker_heartbeats
             SET last_heartbeat_at = $2, current_item_id = $3,
                 items_processed = GREATEST(items_processed, $4),
                 items_succeeded = GREATEST(items_succeeded, $5),
                 items_failed = GREATEST(items_failed, $6),
                 status = CASE WHEN status = 'dead' THEN 'active' ELSE status END
             WHERE worker_id = $1",
        )
        .bind(&heartbeat.worker_id)
        .bind(now)
        .bind(heartbeat.current_item_id.map(|id| id.0))
        .bind(to_i64(heartbeat.stats.items_processed))
        .bind(to_i64(heartbeat.stats.items_succeeded))
        .bind(to_i64(heartbeat.stats.items_failed))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::NotFound(format!("worker {}", heartbeat.worker_id)));
        }
        Ok(())
    }

    pub(crate) async fn update_worker_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE worker_heartbeats
             SET status = $2,
                 last_heartbeat_at = CASE WHEN $2 = 'dead' THEN last_heartbeat_at ELSE $3 END,
                 current_item_id = CASE WHEN $2 = 'dead' THEN NULL ELSE current_item_id END
             WHERE worker_id = $1",
        )
        .bind(worker_id)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::NotFound(format!("worker {worker_id}")));
        }
        Ok(())
    }

    pub(crate) async fn mark_silent_workers_dead(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "UPDATE worker_heartbeats SET status = 'dead'
             WHERE status <> 'dead' AND last_heartbeat_at < $1
             RETURNING worker_id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut ids: Vec<String> = rows.into_iter().map(|(id,)| id).collect();
        ids.sort();
        Ok(ids)
    }

    pub(crate) async fn get_worker_row(&self, worker_id: &str) -> Result<WorkerHeartbeat> {
        let sql = format!("SELECT {COLUMNS} FROM worker_heartbeats WHERE worker_id = $1");
        let row: Option<WorkerRow> = sqlx::query_as(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::NotFound(format!("worker {worker_id}")))?
            .try_into_heartbeat()
    }

    pub(crate) async fn list_worker_rows(&self) -> Result<Vec<WorkerHeartbeat>> {
        let sql = format!("SELECT {COLUMNS} FROM worker_heartbeats ORDER BY worker_id");
        let rows: Vec<WorkerRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(WorkerRow::try_into_heartbeat)
            .collect()
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(sqlx::FromRow)]
struct WorkerRow {
    worker_id: String,
    hostname: String,
    pid: i32,
    started_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    items_processed: i64,
    items_succeeded: i64,
    items_failed: i64,
    status: String,
    current_item_id: Option<Uuid>,
}

impl WorkerRow {
    fn try_into_heartbeat(self) -> Result<WorkerHeartbeat> {
        Ok(WorkerHeartbeat {
            worker_id: self.worker_id,
            hostname: self.hostname,
            pid: self.pid.max(0) as u32,
            started_at: self.started_at,
            last_heartbeat_at: self.last_heartbeat_at,
            stats: WorkerStats {
                items_processed: self.items_processed.max(0) as u64,
                items_succeeded: self.items_succeeded.max(0) as u64,
                items_failed: self.items_failed.max(0) as u64,
            },
            status: self.status.parse()?,
            current_item_id: self.current_item_id.map(WorkId),
        })
    }
}
