//! Worker daemon: register, poll, dispatch, sleep, re-check the deadline.

use crate::config::KeySpace;
use crate::error::{Error, Result};
use crate::model::{Field, PopMode, Status};
use crate::queue::TaskQueue;
use crate::record::{Tunables, WorkerRecord};
use crate::store::Store;
use crate::telemetry::metrics;
use crate::telemetry::worker::{record_status_transition, start_worker_span};
use chrono::{DateTime, Duration as TimeDelta, Local};
use opentelemetry::KeyValue;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Span, debug, info, warn};

use super::action;

/// Minimum lifetime of a worker, in seconds.
pub const BASE_TTL_SECS: i64 = 3600;

/// Upper bound of the random extra lifetime, in seconds.
pub const TTL_JITTER_SECS: i64 = 600;

/// A lifetime between one hour and one hour ten minutes, so a fleet started
/// together does not expire together.
pub fn jittered_ttl<R: Rng + ?Sized>(rng: &mut R) -> TimeDelta {
    TimeDelta::seconds(BASE_TTL_SECS + rng.gen_range(0..=TTL_JITTER_SECS))
}

/// Launch parameters of a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Operator-chosen identifier, used verbatim in the record key.
    pub worker_id: String,
    pub queue: String,
    pub tunables: Tunables,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, queue: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue: queue.into(),
            tunables: Tunables {
                waiting_timeout: 10,
                loop_sleep: 10,
                action: action.into(),
                mode: PopMode::Fifo,
            },
        }
    }

    pub fn waiting_timeout(mut self, secs: u64) -> Self {
        self.tunables.waiting_timeout = secs;
        self
    }

    pub fn loop_sleep(mut self, secs: u64) -> Self {
        self.tunables.loop_sleep = secs;
        self
    }

    pub fn mode(mut self, mode: PopMode) -> Self {
        self.tunables.mode = mode;
        self
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Payload acquired from the queue, if any.
    pub task: Option<String>,
    /// Seconds spent in the sleep phase; 0 when it was skipped.
    pub slept_secs: u64,
}

/// A running worker bound to one queue.
pub struct Worker<S> {
    queue: TaskQueue<S>,
    record: WorkerRecord<S>,
    /// Launch values; used when the record holds nothing usable.
    defaults: Tunables,
    /// `None` once the stored deadline is blank or unparsable.
    end_time: Option<DateTime<Local>>,
    status: Status,
    span: Span,
}

impl<S: Store> Worker<S> {
    /// Register the worker: pick a jittered deadline, create the record and
    /// publish the deadline as `end_date`.
    pub async fn start(store: Arc<S>, keys: &KeySpace, config: WorkerConfig) -> Result<Self> {
        let queue = TaskQueue::new(Arc::clone(&store), keys, &config.queue)?;
        let record = WorkerRecord::new(store, keys, &config.queue, &config.worker_id)?;

        let ttl = jittered_ttl(&mut rand::thread_rng());
        let end_time = Local::now() + ttl;

        record.create(&config.tunables).await?;
        record.set_end_time(Some(end_time)).await?;

        let span = start_worker_span(queue.name(), record.worker_id());
        span.in_scope(|| {
            info!(
                key = record.key(),
                ttl_secs = ttl.num_seconds(),
                end_date = %end_time.format(crate::model::DATE_FORMAT),
                "worker started"
            );
        });

        Ok(Self {
            queue,
            record,
            defaults: config.tunables,
            end_time: Some(end_time),
            status: Status::Started,
            span,
        })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Deadline as last read from the record.
    pub fn end_time(&self) -> Option<DateTime<Local>> {
        self.end_time
    }

    /// True once the deadline is missing or not in the future.
    pub fn is_expired(&self) -> bool {
        self.end_time.is_none_or(|end| Local::now() >= end)
    }

    /// Loop until the deadline passes, then mark the record KILLED.
    ///
    /// A store failure ends the run immediately with the error; the record
    /// then keeps its last status, KILLED is not written.
    pub async fn run(mut self) -> Result<()> {
        let span = self.span.clone();
        async move {
            while !self.is_expired() {
                self.step().await?;
            }
            self.transition(Status::Killed).await?;
            info!(key = self.record.key(), "worker killed");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// One iteration: refresh the record, wait for a task, dispatch it,
    /// optionally sleep, then reload the deadline.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        self.record.read_all().await?;
        let tunables = self.effective_tunables();

        self.transition(Status::Waiting).await?;
        let task = self
            .queue
            .pull(tunables.waiting_timeout, tunables.mode)
            .await?;

        if let Some(ref payload) = task {
            self.transition(Status::Working).await?;
            let run = action::dispatch(&tunables.action, payload).await;
            let labels = [KeyValue::new("queue", self.queue.name().to_string())];
            metrics::actions_dispatched().add(1, &labels);
            metrics::action_duration_ms().record(run.duration_ms as f64, &labels);
            debug!(command = %run.command, duration_ms = run.duration_ms, "action dispatched");
        }

        let slept_secs = tunables.loop_sleep;
        if slept_secs != 0 {
            self.transition(Status::Sleeping).await?;
            tokio::time::sleep(Duration::from_secs(slept_secs)).await;
        }

        // Fresh read so an operator edit made during this iteration counts.
        let end_date = self.record.fetch(Field::EndDate).await?;
        self.end_time = end_date.and_then(crate::model::parse_date);
        if self.end_time.is_none() {
            info!(end_date = ?end_date, "end date blank or unparsable, stopping");
        }

        Ok(StepOutcome { task, slept_secs })
    }

    /// Current tunables: record values where usable, launch values otherwise.
    fn effective_tunables(&self) -> Tunables {
        let snap = self.record.snapshot();
        let defaults = &self.defaults;
        let fallback = |field: Field| {
            if let Some(raw) = snap.get(field) {
                warn!(field = field.as_str(), value = raw, "unusable record value, keeping launch value");
            }
        };

        Tunables {
            waiting_timeout: snap.waiting_timeout().unwrap_or_else(|| {
                fallback(Field::WaitingTimeout);
                defaults.waiting_timeout
            }),
            loop_sleep: snap.loop_sleep().unwrap_or_else(|| {
                fallback(Field::LoopSleep);
                defaults.loop_sleep
            }),
            action: snap
                .action()
                .map(str::to_string)
                .unwrap_or_else(|| defaults.action.clone()),
            mode: snap.mode().unwrap_or_else(|| {
                fallback(Field::Type);
                defaults.mode
            }),
        }
    }

    async fn transition(&mut self, to: Status) -> Result<()> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        self.record.set_status(to).await?;
        self.status = to;
        record_status_transition(&self.span, from, to);
        metrics::worker_status_transitions().add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
        Ok(())
    }
}
