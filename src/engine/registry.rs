//! Worker registry: liveness bookkeeping.
//!
//! Workers register once, then heartbeat. One that stays silent past the
//! grace window is marked dead by [`WorkerRegistry::sweep`]. Nothing here
//! touches work items; a dead worker's items come back through lease expiry.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{Heartbeat, WorkerHeartbeat, WorkerStatus};
use crate::store::WorkStore;
use crate::telemetry::metrics;

pub struct WorkerRegistry {
    store: Arc<dyn WorkStore>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    shutdown: Arc<Notify>,
}

impl Clone for WorkerRegistry {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            grace: self.grace,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn WorkStore>, clock: Arc<dyn Clock>, grace: Duration) -> Self {
        Self {
            store,
            clock,
            grace,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Create or reset the worker's row. Counters start at zero.
    pub async fn register(
        &self,
        worker_id: &str,
        hostname: &str,
        pid: u32,
    ) -> Result<WorkerHeartbeat> {
        if worker_id.is_empty() {
            return Err(Error::InvalidArgument("worker id must not be empty".into()));
        }
        let row = self
            .store
            .register_worker(worker_id, hostname, pid, self.clock.now())
            .await?;
        info!(worker_id, hostname, pid, "worker registered");
        Ok(row)
    }

    pub async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        let result = self.store.heartbeat(heartbeat, self.clock.now()).await;
        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::worker_heartbeats().add(1, &[KeyValue::new("result", label)]);
        debug!(
            worker_id = %heartbeat.worker_id,
            current_item = ?heartbeat.current_item_id,
            result = label,
            "heartbeat"
        );
        result
    }

    pub async fn set_status(&self, worker_id: &str, status: WorkerStatus) -> Result<()> {
        self.store
            .set_worker_status(worker_id, status, self.clock.now())
            .await?;
        info!(worker_id, %status, "worker status changed");
        Ok(())
    }

    /// Mark every worker silent for longer than the grace window as dead.
    /// Returns their ids.
    pub async fn sweep(&self) -> Result<Vec<String>> {
        let grace = chrono::Duration::from_std(self.grace)
            .map_err(|_| Error::InvalidArgument(format!("grace {:?} too large", self.grace)))?;
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(grace)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let dead = self.store.mark_dead_workers(cutoff).await?;
        if !dead.is_empty() {
            metrics::workers_marked_dead().add(dead.len() as u64, &[]);
            warn!(workers = ?dead, "workers missed their heartbeat window, marked dead");
        }
        Ok(dead)
    }

    pub async fn get(&self, worker_id: &str) -> Result<WorkerHeartbeat> {
        self.store.get_worker(worker_id).await
    }

    pub async fn list(&self) -> Result<Vec<WorkerHeartbeat>> {
        self.store.list_workers().await
    }

    /// Whether a worker counts as dead right now, whether or not a sweep has
    /// recorded it yet.
    pub fn is_dead(&self, row: &WorkerHeartbeat) -> bool {
        row.status == WorkerStatus::Dead
            || chrono::Duration::from_std(self.grace)
                .map(|grace| row.is_overdue(self.clock.now(), grace))
                .unwrap_or(false)
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Sweep every `interval` until [`shutdown`](Self::shutdown).
    pub async fn run(&self, interval: Duration) -> Result<()> {
        info!(
            grace_ms = self.grace.as_millis() as u64,
            "worker registry sweeper started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("worker registry sweeper shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "worker sweep failed");
                    }
                }
            }
        }
    }
}
