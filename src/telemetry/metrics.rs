//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for workq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: enqueue calls.
/// Labels: `queue`, `result` ("created" | "duplicate").
pub fn items_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.enqueued")
        .with_description("Number of enqueue calls")
        .build()
}

/// Counter: claim attempts.
/// Labels: `queue`, `result` ("claimed" | "empty").
pub fn items_claimed() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.claimed")
        .with_description("Number of claim attempts")
        .build()
}

/// Counter: work item state transitions.
/// Labels: `queue`, `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.state_transitions")
        .with_description("Number of work item state transitions")
        .build()
}

/// Counter: items taken back by the lease monitor.
/// Labels: `queue`, `to` ("new" | "deadletter").
pub fn items_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.reclaimed")
        .with_description("Items reclaimed after lease expiry")
        .build()
}

/// Counter: completion or renewal reports rejected because the lease was lost.
/// Labels: `queue`, `operation` ("complete" | "renew").
pub fn stale_claims() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.stale_claims")
        .with_description("Reports rejected for lost leases")
        .build()
}

/// Counter: heartbeats sent.
/// Labels: `result` ("ok" | "error").
pub fn worker_heartbeats() -> Counter<u64> {
    meter()
        .u64_counter("workq.workers.heartbeats")
        .with_description("Worker heartbeat ticks")
        .build()
}

/// Counter: workers marked dead by the registry sweep.
pub fn workers_marked_dead() -> Counter<u64> {
    meter()
        .u64_counter("workq.workers.marked_dead")
        .with_description("Workers marked dead after missing heartbeats")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
