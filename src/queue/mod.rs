//! Typed queue handle.
//!
//! [`WorkQueue<P>`] binds a queue name, its [`RetryPolicy`] and a payload type
//! to a shared [`WorkStore`]. The store only ever sees JSON; encoding and
//! decoding happen here. One process typically holds several instantiations
//! over the same store, e.g. a `WorkQueue<FetchTask>` for page fetches and a
//! `WorkQueue<DeriveJob>` for LLM jobs.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::QueueSettings;
use crate::error::{Error, Result};
use crate::model::{EnqueueResult, NewWorkItem, Outcome, QueueStats, Status, WorkId, WorkItem};
use crate::policy::RetryPolicy;
use crate::store::{ListFilter, WorkStore};
use crate::telemetry::metrics;

pub use crate::model::DEFAULT_MAX_ATTEMPTS;

/// A payload plus its enqueue options.
#[derive(Debug, Clone)]
pub struct Job<P> {
    payload: P,
    priority: i32,
    max_attempts: Option<u32>,
    dedupe_key: Option<String>,
    delay: Option<Duration>,
}

impl<P> Job<P> {
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            priority: 0,
            max_attempts: None,
            dedupe_key: None,
            delay: None,
        }
    }

    /// Higher runs first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    /// At most one live item per key per queue.
    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A claimed item with its payload decoded.
#[derive(Debug, Clone)]
pub struct Claimed<P> {
    pub item: WorkItem,
    pub payload: P,
}

impl<P> Claimed<P> {
    pub fn id(&self) -> WorkId {
        self.item.id
    }
}

/// Handle to one named queue carrying payloads of type `P`.
pub struct WorkQueue<P> {
    name: String,
    store: Arc<dyn WorkStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    default_max_attempts: u32,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for WorkQueue<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            policy: self.policy,
            default_max_attempts: self.default_max_attempts,
            _payload: PhantomData,
        }
    }
}

impl<P> std::fmt::Debug for WorkQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("default_max_attempts", &self.default_max_attempts)
            .finish_non_exhaustive()
    }
}

impl<P> WorkQueue<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, store: Arc<dyn WorkStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            store,
            clock,
            policy: RetryPolicy::default(),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            _payload: PhantomData,
        }
    }

    /// Build a queue from its settings entry.
    pub fn from_settings(
        settings: &QueueSettings,
        store: Arc<dyn WorkStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(settings.name.clone(), store, clock)
            .with_policy(settings.policy())
            .with_default_max_attempts(settings.max_attempts)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_max_attempts(mut self, n: u32) -> Self {
        self.default_max_attempts = n;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn WorkStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------

    /// Enqueue a payload with default options.
    pub async fn enqueue(&self, payload: P) -> Result<EnqueueResult> {
        self.enqueue_job(Job::new(payload)).await
    }

    /// Enqueue a payload with explicit options. A live item holding the same
    /// dedupe key is returned as [`EnqueueResult::Duplicate`].
    pub async fn enqueue_job(&self, job: Job<P>) -> Result<EnqueueResult> {
        let mut new = NewWorkItem::new(self.name.clone(), serde_json::to_value(&job.payload)?)
            .priority(job.priority);
        if let Some(n) = job.max_attempts {
            new = new.max_attempts(n);
        }
        if let Some(key) = job.dedupe_key {
            new = new.dedupe_key(key);
        }
        if let Some(delay) = job.delay {
            new = new.delay(delay);
        }
        self.enqueue_raw(new).await
    }

    /// Enqueue an already-encoded item. Its queue name is overwritten with
    /// this queue's.
    pub async fn enqueue_raw(&self, new: NewWorkItem) -> Result<EnqueueResult> {
        let new = NewWorkItem {
            queue_name: self.name.clone(),
            ..new
        }
        .validate(self.default_max_attempts)?;

        let started = Instant::now();
        let result = self.store.enqueue(new, self.clock.now()).await?;
        self.record_duration("enqueue", started);

        let label = if result.is_duplicate() { "duplicate" } else { "created" };
        metrics::items_enqueued().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("result", label),
            ],
        );
        debug!(queue = %self.name, id = %result.id(), result = label, "enqueued");
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Worker side
    // ------------------------------------------------------------------

    /// Claim the next dispatchable item, or `None` when the queue is empty.
    ///
    /// An item whose payload no longer decodes as `P` can never succeed; it is
    /// deadlettered on the spot and the next item is tried.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Claimed<P>>> {
        self.policy.validate()?;
        loop {
            let started = Instant::now();
            let claimed = self
                .store
                .claim(&self.name, worker_id, self.policy.lease_duration, self.clock.now())
                .await?;
            self.record_duration("claim", started);

            let Some(item) = claimed else {
                metrics::items_claimed().add(
                    1,
                    &[
                        KeyValue::new("queue", self.name.clone()),
                        KeyValue::new("result", "empty"),
                    ],
                );
                return Ok(None);
            };

            metrics::items_claimed().add(
                1,
                &[
                    KeyValue::new("queue", self.name.clone()),
                    KeyValue::new("result", "claimed"),
                ],
            );
            self.record_transition(Status::New, Status::Running);
            debug!(
                queue = %self.name,
                id = %item.id,
                worker_id,
                attempt = item.attempt_count,
                "claimed"
            );

            match item.payload_as::<P>() {
                Ok(payload) => return Ok(Some(Claimed { item, payload })),
                Err(e) => {
                    warn!(queue = %self.name, id = %item.id, error = %e, "undecodable payload, deadlettering");
                    self.complete(item.id, worker_id, &Outcome::fatal(format!("payload: {e}")))
                        .await?;
                }
            }
        }
    }

    /// Report the result of an attempt. Returns the item as written.
    ///
    /// Fails with [`Error::StaleClaim`] when `worker_id` no longer holds the
    /// lease; the report is then discarded and the item left alone.
    pub async fn complete(&self, id: WorkId, worker_id: &str, outcome: &Outcome) -> Result<WorkItem> {
        let started = Instant::now();
        let result = self
            .store
            .complete(id, worker_id, outcome, &self.policy, self.clock.now())
            .await;
        self.record_duration("complete", started);

        match result {
            Ok(item) => {
                self.record_transition(Status::Running, item.status);
                match item.status {
                    Status::Deadletter => warn!(
                        queue = %self.name,
                        id = %id,
                        attempts = item.attempt_count,
                        error = item.last_error.as_deref().unwrap_or(""),
                        "deadlettered"
                    ),
                    Status::New => info!(
                        queue = %self.name,
                        id = %id,
                        attempts = item.attempt_count,
                        available_at = %item.available_at,
                        "retry scheduled"
                    ),
                    _ => debug!(queue = %self.name, id = %id, status = %item.status, "completed"),
                }
                Ok(item)
            }
            Err(e) => {
                if e.is_stale_claim() {
                    self.record_stale("complete");
                }
                Err(e)
            }
        }
    }

    /// Push the lease of a running item out by one lease duration.
    pub async fn renew_lease(&self, id: WorkId, worker_id: &str) -> Result<DateTime<Utc>> {
        let result = self
            .store
            .renew_lease(id, worker_id, self.policy.lease_duration, self.clock.now())
            .await;
        if let Err(ref e) = result {
            if e.is_stale_claim() {
                self.record_stale("renew");
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Operator side
    // ------------------------------------------------------------------

    pub async fn get(&self, id: WorkId) -> Result<WorkItem> {
        let item = self.store.get(id).await?;
        if item.queue_name != self.name {
            return Err(Error::NotFound(format!("work item {id} in queue {}", self.name)));
        }
        Ok(item)
    }

    /// Items of this queue, newest first.
    pub async fn list(&self, status: Option<Status>, limit: usize) -> Result<Vec<WorkItem>> {
        self.store
            .list(&ListFilter {
                queue_name: Some(self.name.clone()),
                status,
                limit,
            })
            .await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.store.stats(&self.name).await
    }

    /// Give a deadlettered item `extra_attempts` more tries.
    pub async fn requeue(&self, id: WorkId, extra_attempts: u32) -> Result<WorkItem> {
        self.get(id).await?;
        let item = self.store.requeue(id, extra_attempts, self.clock.now()).await?;
        self.record_transition(Status::Deadletter, Status::New);
        info!(queue = %self.name, id = %id, max_attempts = item.max_attempts, "requeued");
        Ok(item)
    }

    /// Delete terminal items completed more than `older_than` ago.
    pub async fn purge(&self, older_than: Duration) -> Result<u64> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|_| Error::InvalidArgument(format!("purge age {older_than:?} too large")))?;
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.store.purge(&self.name, cutoff).await?;
        info!(queue = %self.name, removed, %cutoff, "purged");
        Ok(removed)
    }

    fn record_transition(&self, from: Status, to: Status) {
        metrics::state_transitions().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
    }

    fn record_stale(&self, operation: &'static str) {
        metrics::stale_claims().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("operation", operation),
            ],
        );
        info!(queue = %self.name, operation, "stale claim rejected");
    }

    fn record_duration(&self, operation: &'static str, started: Instant) {
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("operation", operation),
                KeyValue::new("queue", self.name.clone()),
            ],
        );
    }
}
