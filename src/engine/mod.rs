//! Worker engine: the polling loop and action dispatch.

pub mod action;
pub mod daemon;

pub use daemon::{StepOutcome, Worker, WorkerConfig, jittered_ttl};
