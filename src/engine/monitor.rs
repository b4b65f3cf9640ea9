//! Lease monitor: returns items held by silent workers to the queue.
//!
//! Each sweep moves every RUNNING item whose lease has run out back to NEW
//! (claimable immediately) or, when it has no attempts left, to DEADLETTER.
//! `attempt_count` is never touched. Sweeps are safe to run from any number
//! of processes at once: the store skips rows another sweeper holds.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::MonitorSettings;
use crate::error::Result;
use crate::model::Status;
use crate::store::{Reclaimed, WorkStore};
use crate::telemetry::metrics;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Rows per reclaim statement.
    pub batch_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig::from(&MonitorSettings::default())
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(s: &MonitorSettings) -> Self {
        Self {
            interval: s.interval(),
            batch_size: s.batch_size.max(1),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub deadlettered: usize,
    pub items: Vec<Reclaimed>,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.requeued + self.deadlettered
    }
}

pub struct LeaseMonitor {
    store: Arc<dyn WorkStore>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    shutdown: Arc<Notify>,
}

impl LeaseMonitor {
    pub fn new(store: Arc<dyn WorkStore>, clock: Arc<dyn Clock>, config: MonitorConfig) -> Self {
        Self {
            store,
            clock,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal [`run`](Self::run) to return.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Reclaim every item whose lease has expired as of now.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        loop {
            let batch = self
                .store
                .reclaim_expired(now, self.config.batch_size)
                .await?;
            let short = batch.len() < self.config.batch_size;

            for r in batch {
                match r.status {
                    Status::Deadletter => {
                        report.deadlettered += 1;
                        warn!(
                            queue = %r.queue_name,
                            id = %r.id,
                            worker_id = r.claimed_by.as_deref().unwrap_or(""),
                            attempts = r.attempt_count,
                            "lease expired with no attempts left, deadlettered"
                        );
                    }
                    _ => {
                        report.requeued += 1;
                        info!(
                            queue = %r.queue_name,
                            id = %r.id,
                            worker_id = r.claimed_by.as_deref().unwrap_or(""),
                            attempts = r.attempt_count,
                            "lease expired, requeued"
                        );
                    }
                }
                metrics::items_reclaimed().add(
                    1,
                    &[
                        KeyValue::new("queue", r.queue_name.clone()),
                        KeyValue::new("to", r.status.as_str()),
                    ],
                );
                metrics::state_transitions().add(
                    1,
                    &[
                        KeyValue::new("queue", r.queue_name.clone()),
                        KeyValue::new("from", Status::Running.as_str()),
                        KeyValue::new("to", r.status.as_str()),
                    ],
                );
                report.items.push(r);
            }

            if short {
                break;
            }
        }

        if report.total() > 0 {
            info!(
                requeued = report.requeued,
                deadlettered = report.deadlettered,
                "lease sweep finished"
            );
        } else {
            debug!("lease sweep found nothing");
        }
        Ok(report)
    }

    /// Sweep on every interval tick until [`shutdown`](Self::shutdown).
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run(&self) -> Result<()> {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "lease monitor started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("lease monitor shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        if e.is_transient() {
                            warn!(error = %e, "lease sweep failed, will retry");
                        } else {
                            error!(error = %e, "lease sweep failed");
                        }
                    }
                }
            }
        }
    }
}
