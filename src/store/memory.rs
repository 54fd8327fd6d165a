//! In-process store with the same list and hash semantics as Redis.
//!
//! Used by tests and local dry runs. Blocking pops park on a `Notify`
//! that every push wakes.

use super::{End, HashOp, Store};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pop(&self, key: &str, end: End) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let list = inner.lists.get_mut(key)?;
        let value = match end {
            End::Left => list.pop_front(),
            End::Right => list.pop_back(),
        };
        // Redis deletes a list once it is empty.
        if list.is_empty() {
            inner.lists.remove(key);
        }
        value
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let len = {
            let mut inner = self.inner.lock().await;
            let list = inner.lists.entry(key.to_string()).or_default();
            list.push_back(value.to_string());
            list.len()
        };
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn bpop(&self, key: &str, end: End, timeout: Duration) -> Result<Option<String>> {
        // Zero, or a wait too large to represent, blocks until a push.
        let deadline = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.pop(key, end).await {
                return Ok(Some(value));
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn apply(&self, key: &str, ops: &[HashOp]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // Work on a copy so a failing increment leaves the hash untouched.
        let mut hash = inner.hashes.get(key).cloned().unwrap_or_default();
        for op in ops {
            match op {
                HashOp::Set(field, value) => {
                    hash.insert(field.clone(), value.clone());
                }
                HashOp::Incr(field, delta) => {
                    let current = match hash.get(field) {
                        Some(raw) => raw.parse::<i64>().map_err(|_| Error::Parse {
                            what: "hash counter",
                            value: raw.clone(),
                        })?,
                        None => 0,
                    };
                    hash.insert(field.clone(), (current + delta).to_string());
                }
            }
        }
        inner.hashes.insert(key.to_string(), hash);
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let inner = self.inner.lock().await;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }
}
