//! Error types for workq.

use thiserror::Error;

use crate::model::{Status, WorkId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller no longer owns the lease on this item. The item was
    /// reclaimed by the lease monitor or resolved by another report; the
    /// caller must discard its result.
    #[error("stale claim: work item {id} is no longer leased to {worker_id}")]
    StaleClaim { id: WorkId, worker_id: String },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dedupe key {key:?} is held by live item {existing} in queue {queue}")]
    DuplicateKey {
        queue: String,
        key: String,
        existing: WorkId,
    },

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure is a transient store condition that the caller
    /// should retry (with jitter) rather than report as a payload failure.
    ///
    /// Covers serialization failures (40001), deadlock victims (40P01),
    /// lock timeouts (55P03), pool exhaustion, and connection I/O errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage(sqlx::Error::Database(db)) => matches!(
                db.code().as_deref(),
                Some("40001") | Some("40P01") | Some("55P03")
            ),
            Error::Storage(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }

    /// Whether this is a stale-claim rejection.
    pub fn is_stale_claim(&self) -> bool {
        matches!(self, Error::StaleClaim { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
