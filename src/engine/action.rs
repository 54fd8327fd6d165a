//! Action dispatch: render the command template and run it through the shell.
//!
//! The run is awaited to completion with no time bound. While it runs the
//! worker cannot poll, check its deadline or observe an operator kill. Exit
//! status and output are not interpreted; a failing action looks exactly
//! like a successful one to the worker.

use crate::model::render_action;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// What happened when an action was dispatched.
#[derive(Debug)]
pub struct ActionRun {
    /// The command line after substitution.
    pub command: String,
    /// Exit status, or `None` if the shell could not be spawned.
    pub status: Option<ExitStatus>,
    pub duration_ms: u64,
}

/// Substitute `payload` into `template` and run the result with `sh -c`,
/// inheriting stdio.
pub async fn dispatch(template: &str, payload: &str) -> ActionRun {
    let command = render_action(template, payload);
    let start = Instant::now();

    debug!(%command, "running action");
    let status = match Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .status()
        .await
    {
        Ok(status) => {
            debug!(code = status.code(), "action finished");
            Some(status)
        }
        Err(e) => {
            warn!(%command, error = %e, "action could not be started");
            None
        }
    };

    ActionRun {
        command,
        status,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
