//! Key-value store capability used by queues and worker records.
//!
//! The core only needs a handful of list and hash primitives. `RedisStore`
//! talks to a live server; `MemoryStore` keeps everything in-process.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::Result;
use crate::model::PopMode;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// End of a list a blocking pop removes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    Left,
    Right,
}

impl From<PopMode> for End {
    fn from(mode: PopMode) -> Self {
        match mode {
            PopMode::Fifo => End::Left,
            PopMode::Lifo => End::Right,
        }
    }
}

/// One write in an atomic hash batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOp {
    Set(String, String),
    Incr(String, i64),
}

impl HashOp {
    pub fn set(field: impl Into<String>, value: impl ToString) -> Self {
        HashOp::Set(field.into(), value.to_string())
    }

    pub fn incr(field: impl Into<String>, delta: i64) -> Self {
        HashOp::Incr(field.into(), delta)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trip check that the session is alive.
    async fn ping(&self) -> Result<()>;

    /// Append to the right of a list. Returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<usize>;

    /// Current length of a list; 0 if the key does not exist.
    async fn llen(&self, key: &str) -> Result<usize>;

    /// Remove and return one element from `end`, blocking up to `timeout`.
    /// `None` on timeout. A zero timeout blocks until an element arrives.
    /// Concurrent callers never receive the same element.
    async fn bpop(&self, key: &str, end: End, timeout: Duration) -> Result<Option<String>>;

    /// Apply every operation to the hash at `key` as one atomic unit.
    async fn apply(&self, key: &str, ops: &[HashOp]) -> Result<()>;

    /// All fields of a hash; empty if the key does not exist.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
}
