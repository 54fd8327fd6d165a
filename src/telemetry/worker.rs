//! Worker span helpers.

use crate::model::Status;
use tracing::Span;

/// Span covering one worker's whole run.
///
/// `worker.status` is declared empty and filled in by
/// [`record_status_transition`].
pub fn start_worker_span(queue: &str, worker_id: &str) -> Span {
    tracing::info_span!(
        "worker.run",
        "worker.queue" = queue,
        "worker.id" = worker_id,
        "worker.status" = tracing::field::Empty,
    )
}

/// Record a status change on the worker span and emit an event for it.
pub fn record_status_transition(span: &Span, from: Status, to: Status) {
    span.record("worker.status", to.as_str());
    span.in_scope(|| {
        tracing::debug!(from = from.as_str(), to = to.as_str(), "status_transition");
    });
}
