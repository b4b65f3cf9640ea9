//! Work execution span helpers.
//!
//! Provides span creation and state-transition recording for work items
//! flowing through a worker.

use tracing::Span;

use crate::model::WorkItem;

/// Start a span for executing one claimed item.
///
/// The `work.status` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_work_span(item: &WorkItem) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.queue" = %item.queue_name,
        "work.id" = %item.id,
        "work.attempt" = item.attempt_count,
        "work.status" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
///
/// Emits a tracing `info` event scoped to the span and stores the new status.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("work.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
