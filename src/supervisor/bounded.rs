//! Bounded external-process run: spawn, wait with a time limit, kill on
//! overrun, classify the exit code. Shared by clip capture and the source
//! reachability probe.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum BoundedOutcome {
    Completed(std::process::ExitStatus),
    TimedOut,
}

impl BoundedOutcome {
    pub fn success(&self) -> bool {
        matches!(self, BoundedOutcome::Completed(status) if status.success())
    }
}

/// Run `binary` with `args`, killing it if it outlives `limit`.
///
/// A spawn failure is the only error path; an overrun is a normal
/// [`BoundedOutcome::TimedOut`] after the process has been killed and
/// reaped, so no handle leaks past this call.
pub async fn run_bounded(
    binary: &str,
    args: &[String],
    limit: Duration,
) -> std::io::Result<BoundedOutcome> {
    debug!(binary, ?limit, "bounded run: {:?}", args);

    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    match timeout(limit, child.wait()).await {
        Ok(status) => Ok(BoundedOutcome::Completed(status?)),
        Err(_) => {
            warn!(binary, limit_secs = limit.as_secs(), "bounded run overran, killing");
            if let Err(e) = child.start_kill() {
                debug!(binary, "kill failed: {}", e);
            }
            // SIGKILL is prompt; this wait reaps the process.
            let _ = child.wait().await;
            Ok(BoundedOutcome::TimedOut)
        }
    }
}
