//! Integration tests for the worker daemon loop.
//!
//! Workers run against the in-memory store. An operator is simulated by a
//! second `WorkerRecord` handle on the same store.

use async_trait::async_trait;
use chrono::{Duration as TimeDelta, Local};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskman::config::KeySpace;
use taskman::engine::{Worker, WorkerConfig};
use taskman::error::{Error, Result};
use taskman::model::{Field, PopMode, Status};
use taskman::queue::TaskQueue;
use taskman::record::WorkerRecord;
use taskman::store::{End, HashOp, MemoryStore, Store};

fn keys() -> KeySpace {
    KeySpace::default()
}

fn operator<S: Store>(store: &Arc<S>, queue: &str, id: &str) -> WorkerRecord<S> {
    WorkerRecord::new(Arc::clone(store), &keys(), queue, id).unwrap()
}

fn producer<S: Store>(store: &Arc<S>, queue: &str) -> TaskQueue<S> {
    TaskQueue::new(Arc::clone(store), &keys(), queue).unwrap()
}

fn scratch_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("taskman-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("out.txt");
    let _ = std::fs::remove_file(&path);
    path
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_creates_record_with_jittered_end_date() {
    let store = Arc::new(MemoryStore::new());
    let before = Local::now();
    let worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("srv_1", "My Todo", "true"),
    )
    .await
    .unwrap();
    let after = Local::now();

    assert_eq!(worker.status(), Status::Started);
    let end = worker.end_time().expect("deadline set");
    assert!(end >= before + TimeDelta::seconds(3600));
    assert!(end <= after + TimeDelta::seconds(4200));

    let mut record = operator(&store, "mytodo", "srv_1");
    let snap = record.read_all().await.unwrap();
    assert_eq!(snap.status(), Some(Status::Started));
    assert_eq!(snap.action_count(), Some(0));
    assert_eq!(snap.mode(), Some(PopMode::Fifo));
    // Stored at second precision.
    let stored = snap.end_date().unwrap();
    assert!((end - stored) < TimeDelta::seconds(1));
}

#[tokio::test]
async fn restart_with_same_id_overwrites_record() {
    let store = Arc::new(MemoryStore::new());
    let queue = producer(&store, "jobs");
    queue.push("x").await.unwrap();

    let config = WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1);
    let mut first = Worker::start(Arc::clone(&store), &keys(), config.clone()).await.unwrap();
    first.step().await.unwrap();

    let mut record = operator(&store, "jobs", "w");
    assert_eq!(record.read_all().await.unwrap().action_count(), Some(1));

    let _second = Worker::start(Arc::clone(&store), &keys(), config.loop_sleep(5))
        .await
        .unwrap();
    let snap = record.read_all().await.unwrap();
    assert_eq!(snap.status(), Some(Status::Started));
    assert_eq!(snap.action_count(), Some(0));
    assert_eq!(snap.loop_sleep(), Some(5));
}

// ---------------------------------------------------------------------------
// Task processing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn counter_matches_acquired_tasks() {
    let store = Arc::new(MemoryStore::new());
    let queue = producer(&store, "jobs");
    for payload in ["a", "b", "c"] {
        queue.push(payload).await.unwrap();
    }

    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();

    for expected in ["a", "b", "c"] {
        let outcome = worker.step().await.unwrap();
        assert_eq!(outcome.task.as_deref(), Some(expected));
        assert_eq!(outcome.slept_secs, 0);
        assert_eq!(worker.status(), Status::Working);
    }

    // Empty poll: no task, counter unchanged.
    let outcome = worker.step().await.unwrap();
    assert!(outcome.task.is_none());
    assert_eq!(worker.status(), Status::Waiting);

    let mut record = operator(&store, "jobs", "w");
    assert_eq!(record.read_all().await.unwrap().action_count(), Some(3));
}

#[tokio::test]
async fn payload_is_substituted_into_action() {
    let out = scratch_file("substitute");
    let action = format!("printf '%s\\n' '##data##' >> {}", out.display());

    let store = Arc::new(MemoryStore::new());
    let queue = producer(&store, "jobs");
    queue.push("first").await.unwrap();
    queue.push("second").await.unwrap();

    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", action).loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();
    worker.step().await.unwrap();
    worker.step().await.unwrap();

    assert_eq!(std::fs::read_to_string(&out).unwrap(), "first\nsecond\n");
}

#[tokio::test]
async fn action_retuned_in_record_is_used() {
    let out = scratch_file("retune-action");
    let store = Arc::new(MemoryStore::new());
    producer(&store, "jobs").push("payload").await.unwrap();

    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();

    let action = format!("printf '%s' '##data##' > {}", out.display());
    operator(&store, "jobs", "w").set_action(&action).await.unwrap();
    worker.step().await.unwrap();

    assert_eq!(std::fs::read_to_string(&out).unwrap(), "payload");
}

#[tokio::test]
async fn failing_action_does_not_stop_the_worker() {
    let store = Arc::new(MemoryStore::new());
    let queue = producer(&store, "jobs");
    queue.push("1").await.unwrap();
    queue.push("2").await.unwrap();

    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "exit 1").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();

    assert_eq!(worker.step().await.unwrap().task.as_deref(), Some("1"));
    assert_eq!(worker.step().await.unwrap().task.as_deref(), Some("2"));
}

#[tokio::test]
async fn pop_mode_retuned_to_lifo() {
    let store = Arc::new(MemoryStore::new());
    let queue = producer(&store, "jobs");
    for payload in ["old", "mid", "new"] {
        queue.push(payload).await.unwrap();
    }

    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();
    assert_eq!(worker.step().await.unwrap().task.as_deref(), Some("old"));

    operator(&store, "jobs", "w").set_type(PopMode::Lifo).await.unwrap();
    assert_eq!(worker.step().await.unwrap().task.as_deref(), Some("new"));
}

// ---------------------------------------------------------------------------
// Live retuning
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn loop_sleep_change_applies_to_next_sleep() {
    let store = Arc::new(MemoryStore::new());
    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(30).waiting_timeout(1),
    )
    .await
    .unwrap();

    let start = tokio::time::Instant::now();
    let outcome = worker.step().await.unwrap();
    assert_eq!(outcome.slept_secs, 30);
    assert_eq!(worker.status(), Status::Sleeping);
    assert!(start.elapsed() >= Duration::from_secs(31));

    operator(&store, "jobs", "w").set_loop_sleep(2).await.unwrap();
    let start = tokio::time::Instant::now();
    let outcome = worker.step().await.unwrap();
    assert_eq!(outcome.slept_secs, 2);
    let took = start.elapsed();
    assert!(took >= Duration::from_secs(3) && took < Duration::from_secs(4), "took {took:?}");
}

#[tokio::test(start_paused = true)]
async fn zero_loop_sleep_skips_sleeping_status() {
    let store = Arc::new(MemoryStore::new());
    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();

    for _ in 0..3 {
        let outcome = worker.step().await.unwrap();
        assert_eq!(outcome.slept_secs, 0);
        assert_eq!(worker.status(), Status::Waiting);
    }
}

#[tokio::test(start_paused = true)]
async fn unusable_record_values_fall_back_to_launch_values() {
    let store = Arc::new(MemoryStore::new());
    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();

    store
        .apply(
            "worker:jobs:w",
            &[
                HashOp::set("waiting_timeout", "soon"),
                HashOp::set("type", "RANDOM"),
            ],
        )
        .await
        .unwrap();

    let start = tokio::time::Instant::now();
    let outcome = worker.step().await.unwrap();
    assert!(outcome.task.is_none());
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2), "waited {waited:?}");
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn past_end_date_kills_worker_early() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();

    let mut record = operator(&store, "jobs", "w");
    record
        .set_end_time(Some(Local::now() - TimeDelta::minutes(5)))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), worker.run())
        .await
        .expect("worker did not stop")
        .unwrap();

    assert_eq!(record.read_all().await.unwrap().status(), Some(Status::Killed));
}

#[tokio::test]
async fn blank_end_date_kills_running_worker() {
    let store = Arc::new(MemoryStore::new());
    let worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();
    let handle = tokio::spawn(worker.run());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let mut record = operator(&store, "jobs", "w");
    assert_ne!(record.read_all().await.unwrap().status(), Some(Status::Killed));

    record.set_end_time(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();

    let snap = record.read_all().await.unwrap();
    assert_eq!(snap.status(), Some(Status::Killed));
    assert_eq!(snap.get(Field::EndDate), Some(""));
}

#[tokio::test]
async fn extended_end_date_keeps_worker_alive() {
    let store = Arc::new(MemoryStore::new());
    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();

    let extended = Local::now() + TimeDelta::days(1);
    operator(&store, "jobs", "w")
        .set_end_time(Some(extended))
        .await
        .unwrap();
    worker.step().await.unwrap();

    assert!(!worker.is_expired());
    let end = worker.end_time().unwrap();
    assert!((extended - end) < TimeDelta::seconds(1));
}

// ---------------------------------------------------------------------------
// Store behavior seen by the worker
// ---------------------------------------------------------------------------

/// Memory store that logs hash batches and can fail pops on demand.
#[derive(Default)]
struct ProbeStore {
    inner: MemoryStore,
    batches: Mutex<Vec<Vec<HashOp>>>,
    fail_pops: bool,
}

#[async_trait]
impl Store for ProbeStore {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        self.inner.rpush(key, value).await
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.inner.llen(key).await
    }

    async fn bpop(&self, key: &str, end: End, timeout: Duration) -> Result<Option<String>> {
        if self.fail_pops {
            return Err(Error::Store(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection reset",
            ))));
        }
        self.inner.bpop(key, end, timeout).await
    }

    async fn apply(&self, key: &str, ops: &[HashOp]) -> Result<()> {
        self.batches.lock().unwrap().push(ops.to_vec());
        self.inner.apply(key, ops).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.inner.hget(key, field).await
    }
}

#[tokio::test]
async fn status_and_change_date_are_written_together() {
    let store = Arc::new(ProbeStore::default());
    producer(&store, "jobs").push("t").await.unwrap();

    let mut worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();
    worker.step().await.unwrap();

    let batches = store.batches.lock().unwrap();
    let status_batches: Vec<_> = batches
        .iter()
        .filter(|ops| ops.iter().any(|op| matches!(op, HashOp::Set(f, _) if f == "status")))
        .collect();
    // create, WAITING, WORKING
    assert_eq!(status_batches.len(), 3);
    for ops in &status_batches {
        assert!(
            ops.iter()
                .any(|op| matches!(op, HashOp::Set(f, _) if f == "status_changedate")),
            "status written without change date: {ops:?}"
        );
    }
    let working = status_batches[2];
    assert!(working.contains(&HashOp::incr("action_cpt", 1)));
}

#[tokio::test]
async fn pull_failure_aborts_without_killed_status() {
    let store = Arc::new(ProbeStore {
        fail_pops: true,
        ..Default::default()
    });
    let worker = Worker::start(
        Arc::clone(&store),
        &keys(),
        WorkerConfig::new("w", "jobs", "true").loop_sleep(0).waiting_timeout(1),
    )
    .await
    .unwrap();

    let err = worker.run().await.unwrap_err();
    assert!(matches!(err, Error::Pull { .. }), "unexpected error: {err}");
    assert!(err.is_operation());

    let mut record = operator(&store, "jobs", "w");
    assert_eq!(record.read_all().await.unwrap().status(), Some(Status::Waiting));
}
