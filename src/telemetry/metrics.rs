//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("taskman")
}

/// Counter: queue operations.
/// Labels: `queue`, `operation` ("push" | "pull" | "pull_empty").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskman.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: worker status transitions.
/// Labels: `from`, `to`.
pub fn worker_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("taskman.worker.status_transitions")
        .with_description("Number of worker status transitions")
        .build()
}

/// Counter: actions dispatched for acquired tasks.
/// Labels: `queue`.
pub fn actions_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("taskman.worker.actions")
        .with_description("Number of actions dispatched")
        .build()
}

/// Histogram: wall time of one action run, in milliseconds.
/// Labels: `queue`.
pub fn action_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskman.worker.action_duration_ms")
        .with_description("Action run time in milliseconds")
        .with_unit("ms")
        .build()
}
