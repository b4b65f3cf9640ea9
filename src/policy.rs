//! Lease and retry policy.
//!
//! Deciding what a completion report or an expired lease does to an item is
//! pure: it depends only on the item's counters, the outcome, and the policy.
//! Stores call [`RetryPolicy::resolve`] / [`resolve_expired`] while holding the
//! row, then write the returned [`Resolution`].

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::after;
use crate::error::{Error, Result};
use crate::model::{Outcome, Status, WorkItem};

/// Recorded on items returned to the queue by the lease monitor.
pub const LEASE_EXPIRED: &str = "lease expired";

/// Shortest lease a store grants. Postgres keeps microseconds, so anything
/// finer would be written as an already-expired lease.
pub const MIN_LEASE: Duration = Duration::from_millis(1);

/// Reject leases too short to be held at all.
pub fn check_lease(lease: Duration) -> Result<()> {
    if lease < MIN_LEASE {
        return Err(Error::InvalidArgument(format!(
            "lease duration must be at least {MIN_LEASE:?}, got {lease:?}"
        )));
    }
    Ok(())
}

/// Per-queue lease length and retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How long a claim stays valid without renewal.
    pub lease_duration: Duration,
    /// Delay unit for retries: retry N waits `base_backoff * N`.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(300),
            base_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        check_lease(self.lease_duration)
    }

    /// Delay before the next attempt after `attempt_count` attempts.
    /// Linear in the number of attempts already made.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        self.base_backoff.saturating_mul(attempt_count)
    }

    /// When a lease taken at `now` runs out.
    pub fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        after(now, self.lease_duration)
    }

    /// Decide the next state for a running item given the worker's report.
    pub fn resolve(&self, item: &WorkItem, outcome: &Outcome, now: DateTime<Utc>) -> Resolution {
        match outcome {
            Outcome::Success => Resolution::Succeeded,
            Outcome::Fatal { error } => Resolution::Deadletter {
                error: error.clone(),
            },
            Outcome::Failure { error } if item.attempt_count < item.max_attempts => {
                Resolution::Retry {
                    available_at: after(now, self.backoff(item.attempt_count)),
                    error: error.clone(),
                }
            }
            Outcome::Failure { error } => Resolution::Deadletter {
                error: error.clone(),
            },
        }
    }
}

/// Decide what the lease monitor does with an item whose lease ran out.
/// No extra backoff: the lost lease time is the penalty.
pub fn resolve_expired(item: &WorkItem, now: DateTime<Utc>) -> Resolution {
    if item.attempt_count < item.max_attempts {
        Resolution::Retry {
            available_at: now,
            error: LEASE_EXPIRED.to_string(),
        }
    } else {
        Resolution::Deadletter {
            error: LEASE_EXPIRED.to_string(),
        }
    }
}

/// Next state of a running item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Succeeded,
    /// Back to `New`, claimable again from `available_at`.
    Retry {
        available_at: DateTime<Utc>,
        error: String,
    },
    Deadletter { error: String },
}

impl Resolution {
    pub fn status(&self) -> Status {
        match self {
            Resolution::Succeeded => Status::Succeeded,
            Resolution::Retry { .. } => Status::New,
            Resolution::Deadletter { .. } => Status::Deadletter,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            Resolution::Succeeded => None,
            Resolution::Retry { error, .. } | Resolution::Deadletter { error } => Some(error),
        }
    }

    /// Fails unless the queue moves items from `from` to this resolution's status.
    pub fn check(&self, from: Status) -> Result<()> {
        let to = self.status();
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        Ok(())
    }

    /// Write the resolution onto an item: new status, claim released.
    /// `attempt_count` is left alone.
    pub fn apply(&self, item: &mut WorkItem, now: DateTime<Utc>) -> Result<()> {
        self.check(item.status)?;
        item.status = self.status();
        item.claimed_by = None;
        item.claimed_at = None;
        item.lease_expires_at = None;
        item.last_error = self.last_error().map(str::to_string);
        item.updated_at = now;
        match self {
            Resolution::Retry { available_at, .. } => {
                item.available_at = *available_at;
                item.completed_at = None;
            }
            Resolution::Succeeded | Resolution::Deadletter { .. } => {
                item.completed_at = Some(now);
            }
        }
        Ok(())
    }
}
