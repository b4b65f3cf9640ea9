//! Worker runtime: claim, execute, report.
//!
//! A [`Worker`] registers itself, then loops: claim one item from its queue,
//! hand the decoded payload to a [`Handler`], and report the outcome. A
//! background ticker heartbeats for the whole life of the worker and renews
//! the lease of whatever item is in flight.
//!
//! Store errors are never reported as payload failures. Transient ones are
//! retried with jittered exponential backoff; a completion rejected as a stale
//! claim is logged and dropped, since the item already belongs to someone else.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};

use super::registry::WorkerRegistry;
use crate::error::Result;
use crate::model::{Heartbeat, Outcome, Status, WorkId, WorkItem, WorkerStats, WorkerStatus};
use crate::queue::{Claimed, WorkQueue};
use crate::telemetry::work::{record_state_transition, start_work_span};

/// Executes one payload. Failures are expressed through the returned
/// [`Outcome`], not by erroring.
#[async_trait]
pub trait Handler<P: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, item: &WorkItem, payload: P) -> Outcome;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub hostname: String,
    pub pid: u32,
    /// Sleep between claims while the queue is empty.
    pub poll_interval: Duration,
    /// Heartbeat and lease renewal period. Keep well under the lease length.
    pub heartbeat_interval: Duration,
    /// First delay when retrying a transient store error.
    pub retry_base: Duration,
    /// Cap on the retry delay.
    pub retry_max: Duration,
    /// Give up on a store call after this many transient failures.
    pub max_store_retries: u32,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            pid: std::process::id(),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_secs(10),
            max_store_retries: 8,
        }
    }

    /// Delay before retry number `attempt` (0-based): doubles per attempt up to
    /// `retry_max`, then drawn uniformly from its upper half.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let ceiling = self
            .retry_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.retry_max);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms == 0 {
            return ceiling;
        }
        Duration::from_millis(rand::rng().random_range(ceiling_ms / 2..=ceiling_ms))
    }
}

/// State shared with the heartbeat ticker.
#[derive(Default)]
struct Shared {
    current: Option<WorkId>,
    stats: WorkerStats,
}

pub struct Worker<P, H> {
    queue: WorkQueue<P>,
    registry: WorkerRegistry,
    handler: Arc<H>,
    config: WorkerConfig,
    shared: Arc<Mutex<Shared>>,
    stopping: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl<P, H> Worker<P, H>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
    H: Handler<P>,
{
    pub fn new(queue: WorkQueue<P>, registry: WorkerRegistry, handler: H, config: WorkerConfig) -> Self {
        Self {
            queue,
            registry,
            handler: Arc::new(handler),
            config,
            shared: Arc::new(Mutex::new(Shared::default())),
            stopping: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Counters so far.
    pub fn stats(&self) -> WorkerStats {
        lock(&self.shared).stats
    }

    /// Stop claiming. The in-flight item, if any, runs to completion and is
    /// reported before [`run`](Self::run) returns.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Run until [`shutdown`](Self::shutdown). Marks the worker dead on exit.
    pub async fn run(&self) -> Result<()> {
        let id = self.config.worker_id.clone();
        self.with_retry("register", || {
            self.registry
                .register(&id, &self.config.hostname, self.config.pid)
        })
        .await?;

        let ticker = self.spawn_ticker();
        info!(worker_id = %id, queue = %self.queue.name(), "worker started");

        while !self.is_stopping() {
            match self.with_retry("claim", || self.queue.claim(&id)).await {
                Ok(Some(claimed)) => self.process(claimed).await,
                Ok(None) => self.idle().await,
                Err(e) => {
                    error!(worker_id = %id, error = %e, "claim failed");
                    self.idle().await;
                }
            }
        }

        ticker.abort();
        if let Err(e) = self.registry.set_status(&id, WorkerStatus::Dead).await {
            warn!(worker_id = %id, error = %e, "failed to mark worker dead on exit");
        }
        info!(worker_id = %id, stats = ?self.stats(), "worker stopped");
        Ok(())
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.notified() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    async fn process(&self, claimed: Claimed<P>) {
        let Claimed { item, payload } = claimed;
        let id = item.id;
        let span = start_work_span(&item);
        record_state_transition(&span, "new", "running");
        lock(&self.shared).current = Some(id);

        let outcome = {
            let handle = self.handler.handle(&item, payload).instrument(span.clone());
            tokio::pin!(handle);
            let mut draining = false;
            loop {
                tokio::select! {
                    outcome = &mut handle => break outcome,
                    _ = self.shutdown.notified(), if !draining => {
                        draining = true;
                        info!(worker_id = %self.config.worker_id, id = %id, "draining in-flight item");
                        if let Err(e) = self
                            .registry
                            .set_status(&self.config.worker_id, WorkerStatus::Draining)
                            .await
                        {
                            warn!(error = %e, "failed to mark worker draining");
                        }
                    }
                }
            }
        };

        let worker_id = self.config.worker_id.clone();
        let reported = self
            .with_retry("complete", || self.queue.complete(id, &worker_id, &outcome))
            .await;

        lock(&self.shared).current = None;

        // Only results the store accepted count toward the worker's stats.
        match reported {
            Ok(written) => {
                lock(&self.shared)
                    .stats
                    .record(written.status == Status::Succeeded);
                record_state_transition(&span, "running", written.status.as_str());
            }
            Err(e) if e.is_stale_claim() => {
                span.in_scope(|| {
                    warn!(id = %id, "lease lost before completion, result discarded");
                });
            }
            Err(e) => {
                span.in_scope(|| {
                    error!(id = %id, error = %e, "failed to report outcome; lease will expire");
                });
            }
        }
    }

    /// Heartbeat on a fixed period, renewing the in-flight lease each time.
    fn spawn_ticker(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        let queue = self.queue.clone();
        let shared = Arc::clone(&self.shared);
        let worker_id = self.config.worker_id.clone();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; registration just stamped us.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let (current, stats) = {
                    let s = lock(&shared);
                    (s.current, s.stats)
                };

                let hb = Heartbeat::new(worker_id.clone())
                    .current_item(current)
                    .stats(stats);
                if let Err(e) = registry.heartbeat(&hb).await {
                    warn!(worker_id = %worker_id, error = %e, "heartbeat failed");
                }

                if let Some(id) = current {
                    match queue.renew_lease(id, &worker_id).await {
                        Ok(until) => debug!(id = %id, %until, "lease renewed"),
                        Err(e) if e.is_stale_claim() => {
                            warn!(id = %id, "lease lost while running");
                        }
                        Err(e) => warn!(id = %id, error = %e, "lease renewal failed"),
                    }
                }
            }
        })
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Err(e) if e.is_transient() && attempt < self.config.max_store_retries => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}
