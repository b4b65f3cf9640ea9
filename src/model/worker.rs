//! Worker liveness records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::WorkId;

/// One row per worker process, keyed by `worker_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub hostname: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub stats: WorkerStats,
    pub status: WorkerStatus,
    pub current_item_id: Option<WorkId>,
}

impl WorkerHeartbeat {
    /// Has the worker gone quiet for longer than `grace`?
    pub fn is_overdue(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        now - self.last_heartbeat_at > grace
    }
}

/// Cumulative per-worker throughput. Monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub items_processed: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
}

impl WorkerStats {
    /// Element-wise max, so a late heartbeat never rolls counters back.
    pub fn merge_max(self, other: WorkerStats) -> WorkerStats {
        WorkerStats {
            items_processed: self.items_processed.max(other.items_processed),
            items_succeeded: self.items_succeeded.max(other.items_succeeded),
            items_failed: self.items_failed.max(other.items_failed),
        }
    }

    pub fn record(&mut self, succeeded: bool) {
        self.items_processed += 1;
        if succeeded {
            self.items_succeeded += 1;
        } else {
            self.items_failed += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Active,
    /// Finishing its current item, claiming nothing new.
    Draining,
    Dead,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Draining => "draining",
            WorkerStatus::Dead => "dead",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(WorkerStatus::Active),
            "draining" => Ok(WorkerStatus::Draining),
            "dead" => Ok(WorkerStatus::Dead),
            _ => Err(Error::InvalidArgument(format!("unknown worker status: {s}"))),
        }
    }
}

/// A heartbeat tick as sent by a worker.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub worker_id: String,
    pub current_item_id: Option<WorkId>,
    pub stats: WorkerStats,
}

impl Heartbeat {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            current_item_id: None,
            stats: WorkerStats::default(),
        }
    }

    pub fn current_item(mut self, id: Option<WorkId>) -> Self {
        self.current_item_id = id;
        self
    }

    pub fn stats(mut self, stats: WorkerStats) -> Self {
        self.stats = stats;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_max_never_decreases() {
        let stored = WorkerStats {
            items_processed: 10,
            items_succeeded: 8,
            items_failed: 2,
        };
        let late = WorkerStats {
            items_processed: 9,
            items_succeeded: 8,
            items_failed: 1,
        };
        assert_eq!(stored.merge_max(late), stored);
    }
}
