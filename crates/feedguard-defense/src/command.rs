//! Bounded external command execution for the defense mechanisms.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{DefenseError, Result};

/// Spawn `program` with `args`, optionally feeding `stdin`, and wait for it
/// under `timeout`. The child is killed if the timeout elapses.
pub(crate) async fn run_command(
    program: &Path,
    args: &[&str],
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<Output> {
    let label = display(program, args);
    debug!(command = label.as_str(), "executing");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DefenseError::BinaryMissing {
                command: label.clone(),
                path: program.display().to_string(),
            }
        } else {
            DefenseError::Io(e)
        }
    })?;

    if let Some(payload) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(payload).await?;
            // Dropping the handle closes the pipe so the child sees EOF.
        }
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(DefenseError::CommandTimeout {
            command: label,
            secs: timeout.as_secs(),
        }),
    }
}

/// Turn a non-zero exit into a `CommandFailed` carrying the stderr tail.
pub(crate) fn ensure_success(command: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: String = stderr.trim().chars().take(200).collect();
    Err(DefenseError::CommandFailed {
        command: command.to_string(),
        status: output.status.to_string(),
        stderr: tail,
    })
}

fn display(program: &Path, args: &[&str]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().map(|a| a.to_string()));
    parts.join(" ")
}
