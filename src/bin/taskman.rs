//! taskman CLI: worker daemon, producer and operator commands.

use clap::Parser;
use std::sync::Arc;
use taskman::cli::{Cli, Command, QueueArgs, RecordArgs, TuneArgs, WorkerArgs, exit_code};
use taskman::config::Config;
use taskman::engine::{Worker, WorkerConfig};
use taskman::model::parse_date;
use taskman::queue::TaskQueue;
use taskman::record::WorkerRecord;
use taskman::store::RedisStore;
use taskman::telemetry::{TelemetryConfig, init_telemetry};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = exit_code(e.kind());
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let config = Config::load(&Config::resolve_path(cli.config.as_deref()))?;

    match cli.command {
        Command::Worker(args) => cmd_worker(&config, args).await,
        Command::Push { target, payload } => cmd_push(&config, target, &payload).await,
        Command::Show { target, json } => cmd_show(&config, target, json).await,
        Command::Tune(args) => cmd_tune(&config, args).await,
        Command::Kill { target } => cmd_kill(&config, target).await,
    }
}

async fn connect(config: &Config, base: &str) -> anyhow::Result<Arc<RedisStore>> {
    let store = RedisStore::connect(config.instance(base)?).await?;
    Ok(Arc::new(store))
}

async fn cmd_worker(config: &Config, args: WorkerArgs) -> anyhow::Result<()> {
    let guard = init_telemetry(TelemetryConfig::new(
        "taskman-worker",
        config.otel_endpoint.clone(),
    ))?;

    let store = connect(config, &args.base).await?;
    let worker_config = WorkerConfig::new(args.id, args.queue, args.action)
        .waiting_timeout(args.wait)
        .loop_sleep(args.sleep)
        .mode(args.mode);
    let worker = Worker::start(store, &config.keys, worker_config).await?;

    let result = worker.run().await;
    if let Err(ref e) = result {
        error!(error = %e, operation = e.is_operation(), "worker aborted");
    }
    guard.force_flush();
    Ok(result?)
}

async fn cmd_push(config: &Config, target: QueueArgs, payload: &str) -> anyhow::Result<()> {
    let store = connect(config, &target.base).await?;
    let queue = TaskQueue::new(store, &config.keys, &target.queue)?;
    let len = queue.push(payload).await?;
    println!("{len}");
    Ok(())
}

async fn open_record(
    config: &Config,
    target: &RecordArgs,
) -> anyhow::Result<(TaskQueue<RedisStore>, WorkerRecord<RedisStore>)> {
    let store = connect(config, &target.queue.base).await?;
    let queue = TaskQueue::new(Arc::clone(&store), &config.keys, &target.queue.queue)?;
    let mut record = WorkerRecord::new(store, &config.keys, &target.queue.queue, &target.id)?;
    if record.read_all().await?.is_empty() {
        anyhow::bail!("no worker record at {}", record.key());
    }
    Ok((queue, record))
}

async fn cmd_show(config: &Config, target: RecordArgs, json: bool) -> anyhow::Result<()> {
    let (queue, record) = open_record(config, &target).await?;
    let queue_len = queue.len().await?;
    let snapshot = record.snapshot();

    if json {
        let out = serde_json::json!({
            "key": record.key(),
            "queue": queue.key(),
            "queue_length": queue_len,
            "record": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Key:                {}", record.key());
    println!("Queue:              {} ({queue_len} waiting)", queue.key());
    println!("{}", "-".repeat(60));
    for (field, value) in snapshot.iter() {
        println!("{:<20}{value}", format!("{field}:"));
    }
    if let Some(end) = snapshot.end_date() {
        let left = end - chrono::Local::now();
        if left > chrono::Duration::zero() {
            println!("\nExpires in {}s", left.num_seconds());
        } else {
            println!("\nExpired");
        }
    }
    Ok(())
}

async fn cmd_tune(config: &Config, args: TuneArgs) -> anyhow::Result<()> {
    if args.is_empty() {
        anyhow::bail!("nothing to change: pass --sleep, --wait, --type, --action or --end-date");
    }
    let (_, record) = open_record(config, &args.target).await?;

    if let Some(secs) = args.sleep {
        record.set_loop_sleep(secs).await?;
    }
    if let Some(secs) = args.wait {
        record.set_waiting_timeout(secs).await?;
    }
    if let Some(mode) = args.mode {
        record.set_type(mode).await?;
    }
    if let Some(ref action) = args.action {
        record.set_action(action).await?;
    }
    if let Some(ref raw) = args.end_date {
        let end = match raw.trim() {
            "" => None,
            raw => Some(parse_date(raw).ok_or_else(|| anyhow::anyhow!("invalid end date: {raw}"))?),
        };
        record.set_end_time(end).await?;
    }

    println!("Updated {}", record.key());
    Ok(())
}

async fn cmd_kill(config: &Config, target: RecordArgs) -> anyhow::Result<()> {
    let (_, record) = open_record(config, &target).await?;
    record.set_end_time(None).await?;
    println!("Stopping {} after its current iteration", record.key());
    Ok(())
}
