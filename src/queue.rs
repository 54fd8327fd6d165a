//! Task queue operations.
//!
//! A queue is a store list keyed `<prefix><sep><name>`. Producers append on
//! the right; workers take from the left (FIFO) or the right (LIFO) with a
//! blocking pop, so one pushed payload reaches at most one worker.

use crate::config::KeySpace;
use crate::error::{Error, Result};
use crate::model::{PopMode, clean_name};
use crate::store::Store;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;

/// Handle on one named queue.
pub struct TaskQueue<S> {
    store: Arc<S>,
    name: String,
    key: String,
}

impl<S> Clone for TaskQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
            key: self.key.clone(),
        }
    }
}

impl<S: Store> TaskQueue<S> {
    /// Bind to a queue. The name is lowercased and stripped of spaces;
    /// an empty result is rejected.
    pub fn new(store: Arc<S>, keys: &KeySpace, name: &str) -> Result<Self> {
        let name = clean_name(name)?;
        let key = keys.queue_key(&name);
        Ok(Self { store, name, key })
    }

    /// Cleaned queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store key of the underlying list.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Push task data. Returns the number of tasks now in the queue.
    pub async fn push(&self, payload: &str) -> Result<usize> {
        let len = self
            .store
            .rpush(&self.key, payload)
            .await
            .map_err(|e| Error::Push {
                queue: self.key.clone(),
                source: Box::new(e),
            })?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("operation", "push"),
            ],
        );
        Ok(len)
    }

    /// Pull one task, waiting up to `wait_secs` when the queue is empty.
    /// Returns `None` on timeout. A wait of 0 blocks until a task arrives.
    pub async fn pull(&self, wait_secs: u64, mode: PopMode) -> Result<Option<String>> {
        let task = self
            .store
            .bpop(&self.key, mode.into(), Duration::from_secs(wait_secs))
            .await
            .map_err(|e| Error::Pull {
                queue: self.key.clone(),
                source: Box::new(e),
            })?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new(
                    "operation",
                    if task.is_some() { "pull" } else { "pull_empty" },
                ),
            ],
        );
        Ok(task)
    }

    /// Number of tasks waiting.
    pub async fn len(&self) -> Result<usize> {
        self.store.llen(&self.key).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
