//! Command-line interface of the `taskman` binary.

use crate::model::PopMode;
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Exit code after printing usage, requested or not.
pub const EXIT_USAGE: i32 = 255;

/// Exit code when a required parameter is missing.
pub const EXIT_MISSING_PARAMETER: i32 = -1;

#[derive(Debug, Parser)]
#[command(
    name = "taskman",
    about = "Task queue workers on Redis",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Configuration file (defaults to $TASKMAN_CONFIG, then taskman.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a worker daemon that scans a queue
    ///
    /// Each task payload replaces the ##data## mask in --action, and the
    /// result is executed by the shell.
    #[command(arg_required_else_help = true)]
    Worker(WorkerArgs),
    /// Push a task payload onto a queue
    Push {
        #[command(flatten)]
        target: QueueArgs,
        /// Task data (JSON for instance)
        payload: String,
    },
    /// Show a worker record
    Show {
        #[command(flatten)]
        target: RecordArgs,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retune a running worker by writing its record
    Tune(TuneArgs),
    /// Blank a worker's end date so it stops after its current iteration
    Kill {
        #[command(flatten)]
        target: RecordArgs,
    },
}

#[derive(Debug, Args)]
pub struct QueueArgs {
    /// Store instance name
    #[arg(long)]
    pub base: String,
    /// Queue name
    #[arg(long)]
    pub queue: String,
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    #[command(flatten)]
    pub queue: QueueArgs,
    /// Worker identifier
    #[arg(long)]
    pub id: String,
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Worker identifier (hostname plus a number works well)
    #[arg(long)]
    pub id: String,
    /// Store instance name
    #[arg(long)]
    pub base: String,
    /// Queue name
    #[arg(long)]
    pub queue: String,
    /// Command to execute with the task data
    #[arg(long)]
    pub action: String,
    /// Seconds to sleep between two polls
    #[arg(long, default_value_t = 10)]
    pub sleep: u64,
    /// Seconds to wait when the queue is empty
    #[arg(long, default_value_t = 10)]
    pub wait: u64,
    /// How the worker pulls: FIFO or LIFO
    #[arg(long = "type", default_value = "FIFO")]
    pub mode: PopMode,
}

#[derive(Debug, Args)]
pub struct TuneArgs {
    #[command(flatten)]
    pub target: RecordArgs,
    /// New loop_sleep in seconds
    #[arg(long)]
    pub sleep: Option<u64>,
    /// New waiting_timeout in seconds
    #[arg(long)]
    pub wait: Option<u64>,
    /// New pop mode
    #[arg(long = "type")]
    pub mode: Option<PopMode>,
    /// New action template
    #[arg(long)]
    pub action: Option<String>,
    /// New end date ("YYYY-MM-DD HH:MM:SS"); empty stops the worker
    #[arg(long)]
    pub end_date: Option<String>,
}

impl TuneArgs {
    pub fn is_empty(&self) -> bool {
        self.sleep.is_none()
            && self.wait.is_none()
            && self.mode.is_none()
            && self.action.is_none()
            && self.end_date.is_none()
    }
}

/// Process exit code for a command-line parse failure.
pub fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => EXIT_USAGE,
        ErrorKind::DisplayVersion => 0,
        ErrorKind::MissingRequiredArgument => EXIT_MISSING_PARAMETER,
        _ => 2,
    }
}
