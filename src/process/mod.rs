//! Local process execution with explicit timeouts.
//!
//! Every external tool the launcher touches (`gcloud`, `ssh`, the editor CLI)
//! is invoked through [`CommandRunner`], so the workflow never blocks on a
//! child without a deadline and tests can substitute scripted outputs.

use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;
use wait_timeout::ChildExt;

/// How long output pipes may stay open once the child has exited. A
/// background grandchild can inherit the pipes and hold them indefinitely.
const PIPE_GRACE: Duration = Duration::from_secs(1);

/// Result of running an external command to completion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when the process was killed by a
    /// signal.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// What happened to a detached process during its grace window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SpawnOutcome {
    /// The process is still running when the grace window elapsed.
    Running,
    /// The process exited inside the grace window.
    Exited {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },
}

impl SpawnOutcome {
    /// Returns `true` unless the process exited with a non-zero status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Running | Self::Exited { code: Some(0) })
    }
}

/// Errors raised while starting or supervising a local process.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command does not finish before its deadline. The child
    /// is killed before this error is returned.
    #[error("{program} did not finish within {} seconds", .timeout.as_secs())]
    Timeout {
        /// Command that was killed.
        program: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Raised when waiting on the child fails.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Command being waited on.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

impl RunnerError {
    /// Returns `true` for deadline expiry, which callers may treat as
    /// transient.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr,
    /// and kills it if it has not exited after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started and
    /// [`RunnerError::Timeout`] if it overruns.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, RunnerError>;

    /// Starts `program` without waiting for it to finish. The child is
    /// watched for `grace`; an exit inside that window is reported so callers
    /// can detect immediate failures.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn spawn_detached(
        &self,
        program: &str,
        args: &[OsString],
        grace: Duration,
    ) -> Result<SpawnOutcome, RunnerError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, RunnerError> {
        debug!(program, ?args, timeout_secs = timeout.as_secs(), "running command");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        // Drain both pipes on their own threads so a chatty child cannot
        // fill a pipe buffer and stall before the deadline.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_or_kill(&mut child, program, timeout)?;
        let until = Instant::now() + PIPE_GRACE;

        Ok(CommandOutput {
            code: status.code(),
            stdout: collect(stdout, until, program),
            stderr: collect(stderr, until, program),
        })
    }

    fn spawn_detached(
        &self,
        program: &str,
        args: &[OsString],
        grace: Duration,
    ) -> Result<SpawnOutcome, RunnerError> {
        debug!(program, ?args, "spawning detached command");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let waited = child.wait_timeout(grace).map_err(|err| RunnerError::Wait {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        Ok(waited.map_or(SpawnOutcome::Running, |status| SpawnOutcome::Exited {
            code: status.code(),
        }))
    }
}

fn spawn_error(program: &str, err: &std::io::Error) -> RunnerError {
    RunnerError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

fn wait_or_kill(
    child: &mut Child,
    program: &str,
    timeout: Duration,
) -> Result<ExitStatus, RunnerError> {
    let wait_error = |err: std::io::Error| RunnerError::Wait {
        program: program.to_owned(),
        message: err.to_string(),
    };

    match child.wait_timeout(timeout).map_err(wait_error)? {
        Some(status) => Ok(status),
        None => {
            child.kill().ok();
            child.wait().ok();
            Err(RunnerError::Timeout {
                program: program.to_owned(),
                timeout,
            })
        }
    }
}

/// Output read so far from one pipe, plus a signal sent when the pipe closes.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    closed: Receiver<()>,
}

fn drain<S>(stream: Option<S>) -> Option<Drain>
where
    S: Read + Send + 'static,
{
    stream.map(|mut reader| {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let (closed_tx, closed) = mpsc::channel();
        thread::spawn(move || {
            let mut chunk = [0_u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => {
                        if let Ok(mut bytes) = sink.lock() {
                            bytes.extend_from_slice(chunk.get(..read).unwrap_or_default());
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
            closed_tx.send(()).ok();
        });
        Drain { buffer, closed }
    })
}

/// Waits for the pipe to close until `until`, then returns whatever was read.
fn collect(drain: Option<Drain>, until: Instant, program: &str) -> String {
    drain.map_or_else(String::new, |pipe| {
        let wait = until.saturating_duration_since(Instant::now());
        if pipe.closed.recv_timeout(wait).is_err() {
            debug!(program, "output pipe still open after exit; keeping what was read");
        }
        pipe.buffer
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    })
}
