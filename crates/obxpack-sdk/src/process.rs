//! Child process execution with captured output and a time budget.
//!
//! Both the build invoker and the test runner go through [`run_captured`], so
//! every external process gets the same treatment:
//!
//! - stdin is closed, stdout/stderr are captured
//! - pipes are drained on helper threads so a chatty child cannot block on a full pipe
//! - the child is killed once the timeout elapses
//! - output left open by background grandchildren is abandoned at the same deadline

use std::io::{ErrorKind, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::types::PackError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Minimum time granted to flush pipes after the child exits.
const OUTPUT_GRACE: Duration = Duration::from_millis(100);

/// Output of a child process that ran to completion.
#[derive(Debug)]
pub struct CommandOutput {
    pub command: String,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Converts a non-zero exit into [`PackError::BuildFailed`].
    pub fn ensure_success(self) -> Result<Self, PackError> {
        if self.success() {
            return Ok(self);
        }
        Err(PackError::BuildFailed {
            command: self.command,
            status: self.status.to_string(),
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Renders a command the way it would be typed in a shell.
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs `cmd` to completion, killing it if it outlives `timeout`.
///
/// # Errors
///
/// - [`PackError::Spawn`] if the process cannot be started
/// - [`PackError::Timeout`] if it is still running after `timeout`
///
/// Output still held open by processes the child left behind is collected
/// only until the deadline; whatever arrived by then is returned.
pub fn run_captured(mut cmd: Command, timeout: Duration) -> Result<CommandOutput, PackError> {
    let command = describe(&cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(%command, "spawning");
    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| PackError::Spawn {
        command: command.clone(),
        source,
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PackError::Spawn { command, source });
            }
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            // Reader threads are detached: grandchildren may still hold the pipes.
            return Err(PackError::Timeout { command, timeout });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let deadline = (start + timeout).max(Instant::now() + OUTPUT_GRACE);
    Ok(CommandOutput {
        stdout: collect(&stdout, deadline, &command),
        stderr: collect(&stderr, deadline, &command),
        command,
        status,
        elapsed: start.elapsed(),
    })
}

/// Reads `pipe` on a helper thread, forwarding chunks as they arrive.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    rx
}

fn collect(chunks: &Receiver<Vec<u8>>, deadline: Instant, command: &str) -> String {
    let mut buf = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match chunks.recv_timeout(remaining) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(%command, "output still open after exit, likely held by a background process; giving up on it");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
