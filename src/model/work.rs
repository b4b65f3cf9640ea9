//! Work items: identity, lease state, and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work held in a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkId,

    /// Logical partition. Also the scope of the dedupe key.
    pub queue_name: String,

    /// Opaque to the queue. Only producers and workers interpret it.
    pub payload: serde_json::Value,

    pub status: Status,

    /// Higher = dispatched first.
    pub priority: i32,

    /// Earliest time the item may be claimed. Pushed forward on retry backoff.
    pub available_at: DateTime<Utc>,

    /// Number of claims so far. Only a claim increments it.
    pub attempt_count: u32,
    pub max_attempts: u32,

    /// Lease holder. Set only while `status == Running`.
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    /// Caller-supplied fingerprint, unique among live items of the queue.
    pub dedupe_key: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Can a worker claim this item at `now`?
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::New
            && self.available_at <= now
            && self.attempt_count < self.max_attempts
    }

    /// Has the lease run out while the item is still marked running?
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Running && self.lease_expires_at.is_some_and(|exp| exp < now)
    }

    /// Does `worker_id` currently hold the lease?
    pub fn is_leased_to(&self, worker_id: &str) -> bool {
        self.status == Status::Running && self.claimed_by.as_deref() == Some(worker_id)
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<P: serde::de::DeserializeOwned>(&self) -> Result<P> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 chars of the UUID, for tables and log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(WorkId)
            .map_err(|e| Error::InvalidArgument(format!("bad work id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting for a worker (possibly delayed until `available_at`).
    New,
    /// Leased to a worker.
    Running,
    /// Done. Terminal.
    Succeeded,
    /// Legacy parked state. Never written by the queue; not claimable.
    Failed,
    /// Attempts exhausted or payload poisoned. Terminal until an operator requeues.
    Deadletter,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::New,
        Status::Running,
        Status::Succeeded,
        Status::Failed,
        Status::Deadletter,
    ];

    /// Transitions the queue itself performs.
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (New, Running)              // claim
                | (Running, Succeeded)  // complete: success
                | (Running, New)        // complete: retry, or lease reclaim
                | (Running, Deadletter) // complete: exhausted/fatal, or lease reclaim
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Deadletter)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Running => "running",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Deadletter => "deadletter",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(Status::New),
            "running" => Ok(Status::Running),
            "succeeded" => Ok(Status::Succeeded),
            "failed" => Ok(Status::Failed),
            "deadletter" | "dead" => Ok(Status::Deadletter),
            _ => Err(Error::InvalidArgument(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What a worker reports after executing a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Retry if attempts remain.
    Failure { error: String },
    /// The payload can never succeed. Deadletter without further attempts.
    Fatal { error: String },
}

impl Outcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Outcome::Failure {
            error: error.into(),
        }
    }

    pub fn fatal(error: impl Into<String>) -> Self {
        Outcome::Fatal {
            error: error.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// Attempt limit used when neither the queue nor the job sets one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What happened when work was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// New item inserted.
    Created(WorkId),
    /// A live item with the same dedupe key already exists; nothing inserted.
    Duplicate(WorkId),
}

impl EnqueueResult {
    pub fn id(&self) -> WorkId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueResult::Duplicate(_))
    }
}

/// Builder for enqueuing work. Untyped: the payload is already JSON.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub(crate) queue_name: String,
    pub(crate) payload: serde_json::Value,
    pub(crate) priority: i32,
    pub(crate) max_attempts: Option<u32>,
    pub(crate) dedupe_key: Option<String>,
    pub(crate) delay: Option<Duration>,
}

impl NewWorkItem {
    pub fn new(queue_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            queue_name: queue_name.into(),
            payload,
            priority: 0,
            max_attempts: None,
            dedupe_key: None,
            delay: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Hold the item back for `delay` before its first dispatch.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Fill in defaults and reject nonsense before anything touches the store.
    /// Both stores run it on every enqueue.
    pub fn validate(mut self, default_max_attempts: u32) -> Result<Self> {
        if self.queue_name.is_empty() {
            return Err(Error::InvalidArgument("queue name must not be empty".into()));
        }
        let max = self.max_attempts.unwrap_or(default_max_attempts);
        if max == 0 {
            return Err(Error::InvalidArgument("max_attempts must be at least 1".into()));
        }
        self.max_attempts = Some(max);
        if self.dedupe_key.as_deref() == Some("") {
            self.dedupe_key = None;
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Item counts per status for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    pub new: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub deadletter: u64,
}

impl QueueStats {
    pub fn empty(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, status: Status, n: u64) {
        match status {
            Status::New => self.new += n,
            Status::Running => self.running += n,
            Status::Succeeded => self.succeeded += n,
            Status::Failed => self.failed += n,
            Status::Deadletter => self.deadletter += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.new + self.running + self.succeeded + self.failed + self.deadletter
    }
}
