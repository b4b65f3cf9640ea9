//! Work item transitions on Postgres.
//!
//! Claim and reclaim are single `UPDATE`s over a `FOR UPDATE SKIP LOCKED`
//! sub-select. Complete and requeue lock the row with `SELECT .. FOR UPDATE`
//! inside a transaction, decide in Rust, and write before commit.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::clock::after;
use crate::error::{Error, Result};
use crate::model::*;
use crate::policy::{LEASE_EXPIRED, Resolution, RetryPolicy, check_lease};
use crate::store::{ListFilter, Reclaimed};

const COLUMNS: &str = "id, queue_name, payload, status, priority, available_at, attempt_count, \
     max_attempts, claimed_by, claimed_at, lease_expires_at, last_error, dedupe_key, \
     created_at, updated_at, completed_at";

/// Live-row predicate matching the partial unique index on dedupe keys.
const LIVE: &str = "status NOT IN ('succeeded', 'deadletter')";

/// How often enqueue retries when the conflicting row turns terminal
/// between the insert and the lookup.
const ENQUEUE_RETRIES: usize = 3;

impl super::Db {
    /// Insert a new item, or return the live item holding the same dedupe key.
    ///
    /// `ON CONFLICT DO NOTHING` against the partial unique index makes the
    /// check and the insert one statement, so two producers racing on the
    /// same key end up with one row.
    pub(crate) async fn enqueue_item(
        &self,
        new: NewWorkItem,
        now: DateTime<Utc>,
    ) -> Result<EnqueueResult> {
        let new = new.validate(DEFAULT_MAX_ATTEMPTS)?;
        let available_at = new.delay.map_or(now, |d| after(now, d));
        let max_attempts = to_i32(new.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS));

        let insert = format!(
            "INSERT INTO work_items (id, queue_name, payload, status, priority, available_at,
                                     attempt_count, max_attempts, dedupe_key, created_at, updated_at)
             VALUES ($1, $2, $3, 'new', $4, $5, 0, $6, $7, $8, $8)
             ON CONFLICT (queue_name, dedupe_key) WHERE dedupe_key IS NOT NULL AND {LIVE}
             DO NOTHING
             RETURNING id"
        );
        let lookup = format!(
            "SELECT id FROM work_items
             WHERE queue_name = $1 AND dedupe_key = $2 AND {LIVE}
             LIMIT 1"
        );

        for _ in 0..ENQUEUE_RETRIES {
            let inserted: Option<(Uuid,)> = sqlx::query_as(&insert)
                .bind(Uuid::new_v4())
                .bind(&new.queue_name)
                .bind(&new.payload)
                .bind(new.priority)
                .bind(available_at)
                .bind(max_attempts)
                .bind(&new.dedupe_key)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?;

            if let Some((id,)) = inserted {
                return Ok(EnqueueResult::Created(WorkId(id)));
            }

            // Conflict: only possible with a dedupe key.
            let Some(ref key) = new.dedupe_key else {
                return Err(Error::Other("insert conflicted without a dedupe key".into()));
            };
            let existing: Option<(Uuid,)> = sqlx::query_as(&lookup)
                .bind(&new.queue_name)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

            if let Some((id,)) = existing {
                return Ok(EnqueueResult::Duplicate(WorkId(id)));
            }
        }

        Err(Error::Other(format!(
            "enqueue on {} kept racing a terminal transition",
            new.queue_name
        )))
    }

    /// Lease the next eligible item of `queue_name` to `worker_id`.
    pub(crate) async fn claim_item(
        &self,
        queue_name: &str,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        check_lease(lease)?;
        let sql = format!(
            "UPDATE work_items
             SET status = 'running', claimed_by = $2, claimed_at = $3, lease_expires_at = $4,
                 attempt_count = attempt_count + 1, updated_at = $3
             WHERE status = 'new' AND id = (
                 SELECT id FROM work_items
                 WHERE queue_name = $1 AND status = 'new'
                   AND available_at <= $3 AND attempt_count < max_attempts
                 ORDER BY priority DESC, available_at ASC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {COLUMNS}"
        );

        let row: Option<WorkItemRow> = sqlx::query_as(&sql)
            .bind(queue_name)
            .bind(worker_id)
            .bind(now)
            .bind(after(now, lease))
            .fetch_optional(&self.pool)
            .await?;

        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    /// Resolve a running item if `worker_id` still holds its lease.
    pub(crate) async fn complete_item(
        &self,
        id: WorkId,
        worker_id: &str,
        outcome: &Outcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<WorkItem> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {COLUMNS} FROM work_items WHERE id = $1 FOR UPDATE");
        let item = sqlx::query_as::<_, WorkItemRow>(&select)
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_work_item()?;

        if !item.is_leased_to(worker_id) {
            // Dropping the transaction rolls back; nothing was written.
            return Err(Error::StaleClaim {
                id,
                worker_id: worker_id.to_string(),
            });
        }

        let resolution = policy.resolve(&item, outcome, now);
        resolution.check(item.status)?;
        let status = resolution.status();
        let available_at = match &resolution {
            Resolution::Retry { available_at, .. } => *available_at,
            _ => item.available_at,
        };
        let completed_at = status.is_terminal().then_some(now);

        let update = format!(
            "UPDATE work_items
             SET status = $2, claimed_by = NULL, claimed_at = NULL, lease_expires_at = NULL,
                 last_error = $3, available_at = $4, completed_at = $5, updated_at = $6
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        let row: WorkItemRow = sqlx::query_as(&update)
            .bind(id.0)
            .bind(status.as_str())
            .bind(resolution.last_error())
            .bind(available_at)
            .bind(completed_at)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        row.try_into_work_item()
    }

    /// Extend the lease of a running item still owned by `worker_id`.
    pub(crate) async fn renew_item_lease(
        &self,
        id: WorkId,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        check_lease(lease)?;
        let renewed: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "UPDATE work_items SET lease_expires_at = $3, updated_at = $4
             WHERE id = $1 AND status = 'running' AND claimed_by = $2
             RETURNING lease_expires_at",
        )
        .bind(id.0)
        .bind(worker_id)
        .bind(after(now, lease))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match renewed {
            Some((expires,)) => Ok(expires),
            None => {
                // Distinguish a vanished item from a lost lease.
                self.get_item(id).await?;
                Err(Error::StaleClaim {
                    id,
                    worker_id: worker_id.to_string(),
                })
            }
        }
    }

    /// Requeue or deadletter running items whose lease ended before `now`.
    ///
    /// The `CASE` arms encode the same rule as [`crate::policy::resolve_expired`].
    /// Rows locked by an in-flight `complete_item` are skipped; whichever
    /// commits first wins and the loser sees a status mismatch.
    pub(crate) async fn reclaim_expired_items(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reclaimed>> {
        let rows: Vec<(Uuid, String, Option<String>, String, i32)> = sqlx::query_as(
            "UPDATE work_items w
             SET status = CASE WHEN w.attempt_count < w.max_attempts THEN 'new' ELSE 'deadletter' END,
                 available_at = CASE WHEN w.attempt_count < w.max_attempts THEN $1 ELSE w.available_at END,
                 completed_at = CASE WHEN w.attempt_count < w.max_attempts THEN NULL ELSE $1 END,
                 claimed_by = NULL, claimed_at = NULL, lease_expires_at = NULL,
                 last_error = $2, updated_at = $1
             FROM (
                 SELECT id, claimed_by FROM work_items
                 WHERE status = 'running' AND lease_expires_at < $1
                 ORDER BY lease_expires_at ASC
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             ) expired
             WHERE w.id = expired.id AND w.status = 'running'
             RETURNING w.id, w.queue_name, expired.claimed_by, w.status, w.attempt_count",
        )
        .bind(now)
        .bind(LEASE_EXPIRED)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, queue_name, claimed_by, status, attempt_count)| {
                Ok(Reclaimed {
                    id: WorkId(id),
                    queue_name,
                    claimed_by,
                    status: status.parse()?,
                    attempt_count: attempt_count.max(0) as u32,
                })
            })
            .collect()
    }

    /// Get a work item by ID.
    pub(crate) async fn get_item(&self, id: WorkId) -> Result<WorkItem> {
        let sql = format!("SELECT {COLUMNS} FROM work_items WHERE id = $1");
        let row: Option<WorkItemRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_work_item()
    }

    pub(crate) async fn list_items(&self, filter: &ListFilter) -> Result<Vec<WorkItem>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM work_items
             WHERE ($1::text IS NULL OR queue_name = $1)
               AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC
             LIMIT $3"
        );
        let rows: Vec<WorkItemRow> = sqlx::query_as(&sql)
            .bind(filter.queue_name.as_deref())
            .bind(filter.status.map(Status::as_str))
            .bind(i64::try_from(filter.limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(WorkItemRow::try_into_work_item)
            .collect()
    }

    pub(crate) async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM work_items WHERE queue_name = $1 GROUP BY status",
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::empty(queue_name);
        for (status, count) in rows {
            stats.add(status.parse()?, count.max(0) as u64);
        }
        Ok(stats)
    }

    /// Operator action: deadletter → new with `extra_attempts` more tries.
    /// `attempt_count` is kept; `max_attempts` grows instead.
    pub(crate) async fn requeue_item(
        &self,
        id: WorkId,
        extra_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<WorkItem> {
        if extra_attempts == 0 {
            return Err(Error::InvalidArgument(
                "extra_attempts must be at least 1".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {COLUMNS} FROM work_items WHERE id = $1 FOR UPDATE");
        let item = sqlx::query_as::<_, WorkItemRow>(&select)
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))?
            .try_into_work_item()?;

        if item.status != Status::Deadletter {
            return Err(Error::InvalidTransition {
                from: item.status,
                to: Status::New,
            });
        }

        if let Some(ref key) = item.dedupe_key {
            let holder = format!(
                "SELECT id FROM work_items
                 WHERE queue_name = $1 AND dedupe_key = $2 AND {LIVE} AND id <> $3
                 LIMIT 1"
            );
            let existing: Option<(Uuid,)> = sqlx::query_as(&holder)
                .bind(&item.queue_name)
                .bind(key)
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some((existing,)) = existing {
                return Err(Error::DuplicateKey {
                    queue: item.queue_name,
                    key: key.clone(),
                    existing: WorkId(existing),
                });
            }
        }

        let update = format!(
            "UPDATE work_items
             SET status = 'new', available_at = $2, max_attempts = $3,
                 completed_at = NULL, updated_at = $2
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        let row: WorkItemRow = sqlx::query_as(&update)
            .bind(id.0)
            .bind(now)
            .bind(to_i32(item.attempt_count.saturating_add(extra_attempts)))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        row.try_into_work_item()
    }

    /// Operator action: delete terminal items completed before `before`.
    pub(crate) async fn purge_items(&self, queue_name: &str, before: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query(
            "DELETE FROM work_items
             WHERE queue_name = $1 AND status IN ('succeeded', 'deadletter') AND completed_at < $2",
        )
        .bind(queue_name)
        .bind(before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    queue_name: String,
    payload: serde_json::Value,
    status: String,
    priority: i32,
    available_at: DateTime<Utc>,
    attempt_count: i32,
    max_attempts: i32,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    dedupe_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: WorkId(self.id),
            queue_name: self.queue_name,
            payload: self.payload,
            status: self.status.parse()?,
            priority: self.priority,
            available_at: self.available_at,
            attempt_count: self.attempt_count.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            claimed_by: self.claimed_by,
            claimed_at: self.claimed_at,
            lease_expires_at: self.lease_expires_at,
            last_error: self.last_error,
            dedupe_key: self.dedupe_key,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}
