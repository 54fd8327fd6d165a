//! Worker record operations: creation, status changes, tunable publishing,
//! snapshots.
//!
//! A record is a store hash keyed `<prefix><sep><queue><sep><worker-id>`.
//! The daemon owns `status`, `status_changedate`, `start_date` and
//! `action_cpt`; every other field may be overwritten by an operator at any
//! time and is picked up through [`WorkerRecord::read_all`].

use crate::config::KeySpace;
use crate::error::{Error, Result};
use crate::model::{Field, PopMode, Status, clean_name, format_date, parse_date};
use crate::store::{HashOp, Store};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// The live-tunable part of a worker's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    /// Blocking-pop timeout in seconds.
    pub waiting_timeout: u64,
    /// Pause between two iterations in seconds; 0 disables the sleep phase.
    pub loop_sleep: u64,
    /// Command template; `##data##` receives the task payload.
    pub action: String,
    pub mode: PopMode,
}

/// Field values read from the store at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    fields: HashMap<String, String>,
}

impl Snapshot {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(field.as_str()).map(String::as_str)
    }

    /// True when the record does not exist in the store.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn status(&self) -> Option<Status> {
        self.get(Field::Status)?.parse().ok()
    }

    pub fn waiting_timeout(&self) -> Option<u64> {
        self.get(Field::WaitingTimeout)?.trim().parse().ok()
    }

    pub fn loop_sleep(&self) -> Option<u64> {
        self.get(Field::LoopSleep)?.trim().parse().ok()
    }

    pub fn action(&self) -> Option<&str> {
        self.get(Field::Action)
    }

    pub fn action_count(&self) -> Option<u64> {
        self.get(Field::ActionCount)?.trim().parse().ok()
    }

    pub fn mode(&self) -> Option<PopMode> {
        self.get(Field::Type)?.parse().ok()
    }

    /// Parsed `end_date`; `None` when blank, missing or unparsable.
    pub fn end_date(&self) -> Option<DateTime<Local>> {
        parse_date(self.get(Field::EndDate)?)
    }

    /// Fields in their canonical order, skipping those not stored.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        Field::ALL
            .into_iter()
            .filter_map(|field| self.get(field).map(|value| (field, value)))
    }
}

/// Handle on one worker's record.
pub struct WorkerRecord<S> {
    store: Arc<S>,
    worker_id: String,
    key: String,
    snapshot: Snapshot,
}

impl<S: Store> WorkerRecord<S> {
    /// Bind to the record of `worker_id` on `queue`. The queue name is
    /// cleaned like [`TaskQueue`](crate::queue::TaskQueue) names; the id is
    /// used verbatim.
    pub fn new(store: Arc<S>, keys: &KeySpace, queue: &str, worker_id: &str) -> Result<Self> {
        if worker_id.is_empty() {
            return Err(Error::InvalidName("worker id is empty".to_string()));
        }
        let queue = clean_name(queue)?;
        Ok(Self {
            store,
            worker_id: worker_id.to_string(),
            key: keys.worker_key(&queue, worker_id),
            snapshot: Snapshot::default(),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Establish the record in one atomic write: status STARTED, change and
    /// start dates set to now, counter reset, tunables published.
    ///
    /// An existing record with the same key is overwritten field by field.
    pub async fn create(&self, tunables: &Tunables) -> Result<()> {
        let now = format_date(Local::now());
        let ops = [
            HashOp::set(Field::Status.as_str(), Status::Started),
            HashOp::set(Field::StatusChangeDate.as_str(), &now),
            HashOp::set(Field::StartDate.as_str(), &now),
            HashOp::set(Field::ActionCount.as_str(), 0),
            HashOp::set(Field::WaitingTimeout.as_str(), tunables.waiting_timeout),
            HashOp::set(Field::LoopSleep.as_str(), tunables.loop_sleep),
            HashOp::set(Field::Action.as_str(), &tunables.action),
            HashOp::set(Field::Type.as_str(), tunables.mode),
        ];
        self.store.apply(&self.key, &ops).await
    }

    /// Write `status` and its change date together. Entering WORKING also
    /// bumps `action_cpt`; entering STARTED resets it.
    pub async fn set_status(&self, status: Status) -> Result<()> {
        let mut ops = vec![
            HashOp::set(Field::Status.as_str(), status),
            HashOp::set(Field::StatusChangeDate.as_str(), format_date(Local::now())),
        ];
        match status {
            Status::Working => ops.push(HashOp::incr(Field::ActionCount.as_str(), 1)),
            Status::Started => ops.push(HashOp::set(Field::ActionCount.as_str(), 0)),
            _ => {}
        }
        self.store.apply(&self.key, &ops).await
    }

    /// Publish the deadline. `None` blanks it, which ends the worker at its
    /// next deadline check.
    pub async fn set_end_time(&self, end: Option<DateTime<Local>>) -> Result<()> {
        let value = end.map(format_date).unwrap_or_default();
        self.set(Field::EndDate, value).await
    }

    pub async fn set_loop_sleep(&self, secs: u64) -> Result<()> {
        self.set(Field::LoopSleep, secs).await
    }

    pub async fn set_waiting_timeout(&self, secs: u64) -> Result<()> {
        self.set(Field::WaitingTimeout, secs).await
    }

    pub async fn set_action(&self, action: &str) -> Result<()> {
        self.set(Field::Action, action).await
    }

    pub async fn set_type(&self, mode: PopMode) -> Result<()> {
        self.set(Field::Type, mode).await
    }

    async fn set(&self, field: Field, value: impl ToString) -> Result<()> {
        self.store
            .apply(&self.key, &[HashOp::set(field.as_str(), value)])
            .await
    }

    /// Re-read every field, replacing the held snapshot.
    pub async fn read_all(&mut self) -> Result<&Snapshot> {
        self.snapshot = Snapshot {
            fields: self.store.hgetall(&self.key).await?,
        };
        Ok(&self.snapshot)
    }

    /// Re-read one field, updating the held snapshot.
    pub async fn fetch(&mut self, field: Field) -> Result<Option<&str>> {
        let name = field.as_str();
        match self.store.hget(&self.key, name).await? {
            Some(value) => {
                self.snapshot.fields.insert(name.to_string(), value);
            }
            None => {
                self.snapshot.fields.remove(name);
            }
        }
        Ok(self.snapshot.get(field))
    }

    /// Value of `field` in the most recent snapshot.
    pub fn get(&self, field: Field) -> Option<&str> {
        self.snapshot.get(field)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}
