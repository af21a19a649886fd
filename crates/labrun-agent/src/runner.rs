//! Artifact execution.

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use labrun_core::{TaskOutcome, TaskResult};
use nix::unistd::pipe;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe::Receiver;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::artifact::Artifact;

/// `ETXTBSY`: the file is still open for writing somewhere, typically in a
/// process forked while the download was being written.
const TEXT_FILE_BUSY: i32 = 26;

/// Attempts made when the launch fails with `ETXTBSY`.
const LAUNCH_ATTEMPTS: u32 = 3;

/// Runs artifacts as subprocesses and classifies how they ended.
#[derive(Debug, Clone, Default)]
pub struct TaskRunner;

impl TaskRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `artifact` with no arguments and report the outcome.
    ///
    /// A failing artifact is a normal result, not an error: non-zero exits and
    /// launch failures both become [`TaskOutcome::Failed`]. The artifact is
    /// consumed, so its file is gone by the time this returns.
    pub async fn run(&self, artifact: Artifact) -> TaskResult {
        info!(
            task_id = %artifact.task_id(),
            test = %artifact.name(),
            "Running artifact"
        );

        let outcome = match launch(artifact.path()).await {
            Ok(finished) if finished.status.success() => TaskOutcome::Success,
            Ok(finished) => TaskOutcome::failed(failure_text(&finished)),
            Err(e) => {
                warn!(test = %artifact.name(), error = %e, "Failed to launch artifact");
                TaskOutcome::failed(format!("failed to launch: {}", e))
            }
        };

        info!(
            task_id = %artifact.task_id(),
            test = %artifact.name(),
            status = ?outcome.status(),
            "Artifact finished"
        );
        TaskResult::new(artifact.name(), outcome)
    }
}

/// How a launched artifact ended, and everything it printed.
struct Finished {
    status: ExitStatus,
    output: Vec<u8>,
}

async fn launch(path: &Path) -> io::Result<Finished> {
    let mut attempt = 1;
    loop {
        match spawn(path) {
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < LAUNCH_ATTEMPTS => {
                debug!(attempt, "Artifact busy, retrying launch");
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
            Ok((child, output)) => return wait_combined(child, output).await,
        }
    }
}

/// Spawn with stdout and stderr sharing one pipe, so the captured text keeps
/// the order it was written in.
fn spawn(path: &Path) -> io::Result<(Child, Receiver)> {
    let (reader, writer) = pipe().map_err(io::Error::from)?;
    let stderr = writer.try_clone()?;
    let child = Command::new(path)
        .stdin(Stdio::null())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()?;

    // The command is dropped by now, so the child holds the only write ends
    // and the reader sees EOF when it exits.
    let output = Receiver::from_file(File::from(reader))?;
    Ok((child, output))
}

async fn wait_combined(mut child: Child, mut output: Receiver) -> io::Result<Finished> {
    let mut captured = Vec::new();
    let (read, status) = tokio::join!(output.read_to_end(&mut captured), child.wait());
    read?;
    Ok(Finished {
        status: status?,
        output: captured,
    })
}

/// `"{output}: {exit}"`, or just the exit description when nothing was
/// printed.
fn failure_text(finished: &Finished) -> String {
    let captured = String::from_utf8_lossy(&finished.output);
    let captured = captured.trim_end();

    let exit = describe_exit(finished.status);
    if captured.is_empty() {
        exit
    } else {
        format!("{}: {}", captured, exit)
    }
}

fn describe_exit(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    if let Some(code) = status.code() {
        format!("exit status {}", code)
    } else if let Some(signal) = status.signal() {
        format!("terminated by signal {}", signal)
    } else {
        status.to_string()
    }
}
