//! In-process store.
//!
//! All state sits behind one async mutex, so every operation is trivially
//! atomic. Used by the test suite and for single-process embedding; it holds
//! nothing across restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{ListFilter, Reclaimed, WorkStore};
use crate::clock::after;
use crate::error::{Error, Result};
use crate::model::*;
use crate::policy::{RetryPolicy, check_lease, resolve_expired};

#[derive(Default)]
struct State {
    items: HashMap<WorkId, Entry>,
    workers: HashMap<String, WorkerHeartbeat>,
    next_seq: u64,
}

struct Entry {
    /// Insertion order, the last FIFO tie-breaker.
    seq: u64,
    item: WorkItem,
}

impl State {
    fn live_with_key(&self, queue_name: &str, key: &str) -> Option<WorkId> {
        self.items
            .values()
            .filter(|e| {
                e.item.queue_name == queue_name
                    && e.item.dedupe_key.as_deref() == Some(key)
                    && !e.item.status.is_terminal()
            })
            .min_by_key(|e| e.seq)
            .map(|e| e.item.id)
    }

    fn item_mut(&mut self, id: WorkId) -> Result<&mut WorkItem> {
        self.items
            .get_mut(&id)
            .map(|e| &mut e.item)
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))
    }

    fn worker_mut(&mut self, worker_id: &str) -> Result<&mut WorkerHeartbeat> {
        self.workers
            .get_mut(worker_id)
            .ok_or_else(|| Error::NotFound(format!("worker {worker_id}")))
    }
}

/// Store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stale(id: WorkId, worker_id: &str) -> Error {
    Error::StaleClaim {
        id,
        worker_id: worker_id.to_string(),
    }
}

#[async_trait]
impl WorkStore for MemoryStore {
    async fn enqueue(&self, new: NewWorkItem, now: DateTime<Utc>) -> Result<EnqueueResult> {
        let new = new.validate(DEFAULT_MAX_ATTEMPTS)?;
        let mut state = self.state.lock().await;

        if let Some(ref key) = new.dedupe_key {
            if let Some(existing) = state.live_with_key(&new.queue_name, key) {
                return Ok(EnqueueResult::Duplicate(existing));
            }
        }

        let id = WorkId::new();
        let available_at = new.delay.map_or(now, |d| after(now, d));
        let item = WorkItem {
            id,
            queue_name: new.queue_name,
            payload: new.payload,
            status: Status::New,
            priority: new.priority,
            available_at,
            attempt_count: 0,
            max_attempts: new.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            claimed_by: None,
            claimed_at: None,
            lease_expires_at: None,
            last_error: None,
            dedupe_key: new.dedupe_key,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.insert(id, Entry { seq, item });
        Ok(EnqueueResult::Created(id))
    }

    async fn claim(
        &self,
        queue_name: &str,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        check_lease(lease)?;
        let mut state = self.state.lock().await;

        let next = state
            .items
            .values()
            .filter(|e| e.item.queue_name == queue_name && e.item.is_claimable(now))
            .min_by_key(|e| {
                (
                    Reverse(e.item.priority),
                    e.item.available_at,
                    e.item.created_at,
                    e.seq,
                )
            })
            .map(|e| e.item.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let item = state.item_mut(id)?;
        item.status = Status::Running;
        item.claimed_by = Some(worker_id.to_string());
        item.claimed_at = Some(now);
        item.lease_expires_at = Some(after(now, lease));
        item.attempt_count += 1;
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn complete(
        &self,
        id: WorkId,
        worker_id: &str,
        outcome: &Outcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<WorkItem> {
        let mut state = self.state.lock().await;
        let item = state.item_mut(id)?;

        if !item.is_leased_to(worker_id) {
            return Err(stale(id, worker_id));
        }

        policy.resolve(item, outcome, now).apply(item, now)?;
        Ok(item.clone())
    }

    async fn renew_lease(
        &self,
        id: WorkId,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        check_lease(lease)?;
        let mut state = self.state.lock().await;
        let item = state.item_mut(id)?;

        if !item.is_leased_to(worker_id) {
            return Err(stale(id, worker_id));
        }

        let expires = after(now, lease);
        item.lease_expires_at = Some(expires);
        item.updated_at = now;
        Ok(expires)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reclaimed>> {
        let mut state = self.state.lock().await;

        let mut expired: Vec<(DateTime<Utc>, WorkId)> = state
            .items
            .values()
            .filter(|e| e.item.lease_expired(now))
            .map(|e| (e.item.lease_expires_at.unwrap_or(now), e.item.id))
            .collect();
        expired.sort();
        expired.truncate(limit);

        let mut reclaimed = Vec::with_capacity(expired.len());
        for (_, id) in expired {
            let item = state.item_mut(id)?;
            let claimed_by = item.claimed_by.clone();
            resolve_expired(item, now).apply(item, now)?;
            reclaimed.push(Reclaimed {
                id,
                queue_name: item.queue_name.clone(),
                claimed_by,
                status: item.status,
                attempt_count: item.attempt_count,
            });
        }
        Ok(reclaimed)
    }

    async fn get(&self, id: WorkId) -> Result<WorkItem> {
        let state = self.state.lock().await;
        state
            .items
            .get(&id)
            .map(|e| e.item.clone())
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<WorkItem>> {
        let state = self.state.lock().await;
        let mut entries: Vec<&Entry> = state
            .items
            .values()
            .filter(|e| {
                filter
                    .queue_name
                    .as_deref()
                    .is_none_or(|q| e.item.queue_name == q)
                    && filter.status.is_none_or(|s| e.item.status == s)
            })
            .collect();
        entries.sort_by_key(|e| Reverse(e.seq));
        Ok(entries
            .into_iter()
            .take(filter.limit)
            .map(|e| e.item.clone())
            .collect())
    }

    async fn stats(&self, queue_name: &str) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::empty(queue_name);
        for e in state.items.values() {
            if e.item.queue_name == queue_name {
                stats.add(e.item.status, 1);
            }
        }
        Ok(stats)
    }

    async fn requeue(
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

        let mut state = self.state.lock().await;
        let (status, queue_name, dedupe_key) = {
            let item = state.item_mut(id)?;
            (item.status, item.queue_name.clone(), item.dedupe_key.clone())
        };

        if status != Status::Deadletter {
            return Err(Error::InvalidTransition {
                from: status,
                to: Status::New,
            });
        }
        if let Some(key) = dedupe_key {
            if let Some(existing) = state.live_with_key(&queue_name, &key) {
                return Err(Error::DuplicateKey {
                    queue: queue_name,
                    key,
                    existing,
                });
            }
        }

        let item = state.item_mut(id)?;
        item.status = Status::New;
        item.available_at = now;
        item.max_attempts = item.attempt_count.saturating_add(extra_attempts);
        item.completed_at = None;
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn purge(&self, queue_name: &str, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before_len = state.items.len();
        state.items.retain(|_, e| {
            !(e.item.queue_name == queue_name
                && e.item.status.is_terminal()
                && e.item.completed_at.is_some_and(|t| t < before))
        });
        Ok((before_len - state.items.len()) as u64)
    }

    async fn register_worker(
        &self,
        worker_id: &str,
        hostname: &str,
        pid: u32,
        now: DateTime<Utc>,
    ) -> Result<WorkerHeartbeat> {
        let mut state = self.state.lock().await;
        let row = WorkerHeartbeat {
            worker_id: worker_id.to_string(),
            hostname: hostname.to_string(),
            pid,
            started_at: now,
            last_heartbeat_at: now,
            stats: WorkerStats::default(),
            status: WorkerStatus::Active,
            current_item_id: None,
        };
        state.workers.insert(worker_id.to_string(), row.clone());
        Ok(row)
    }

    async fn heartbeat(&self, heartbeat: &Heartbeat, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state.worker_mut(&heartbeat.worker_id)?;
        row.last_heartbeat_at = now;
        row.current_item_id = heartbeat.current_item_id;
        row.stats = row.stats.merge_max(heartbeat.stats);
        if row.status == WorkerStatus::Dead {
            row.status = WorkerStatus::Active;
        }
        Ok(())
    }

    async fn set_worker_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state.worker_mut(worker_id)?;
        row.status = status;
        if status == WorkerStatus::Dead {
            row.current_item_id = None;
        } else {
            row.last_heartbeat_at = now;
        }
        Ok(())
    }

    async fn mark_dead_workers(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let mut dead = Vec::new();
        for row in state.workers.values_mut() {
            if row.status != WorkerStatus::Dead && row.last_heartbeat_at < cutoff {
                row.status = WorkerStatus::Dead;
                dead.push(row.worker_id.clone());
            }
        }
        dead.sort();
        Ok(dead)
    }

    async fn get_worker(&self, worker_id: &str) -> Result<WorkerHeartbeat> {
        let state = self.state.lock().await;
        state
            .workers
            .get(worker_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("worker {worker_id}")))
    }

    async fn list_workers(&self) -> Result<Vec<WorkerHeartbeat>> {
        let state = self.state.lock().await;
        let mut rows: Vec<WorkerHeartbeat> = state.workers.values().cloned().collect();
        rows.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        Ok(rows)
    }
}
