//! # taskman
//!
//! Background task queue on Redis lists, consumed by self-expiring worker
//! daemons.
//!
//! Producers push opaque payloads onto a queue. Workers pull them with a
//! blocking pop and run a shell action per payload. Each worker keeps its
//! tunables and live status in a Redis hash that an operator can edit to
//! retune or stop it without a restart.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod record;
pub mod store;
pub mod telemetry;
