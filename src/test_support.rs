//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::backend::{BackendFuture, InstanceBackend, InstanceState, InstanceTarget};
use crate::process::{CommandOutput, CommandRunner, RunnerError, SpawnOutcome};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// `run` and `spawn_detached` draw from separate queues. Clones share state,
/// so a test can keep one handle for assertions while the code under test
/// owns another.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
}

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<Result<CommandOutput, RunnerError>>,
    spawns: VecDeque<Result<SpawnOutcome, RunnerError>>,
    invocations: Vec<CommandInvocation>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Deadline (or grace window for detached spawns) supplied by the caller.
    pub timeout: Duration,
    /// Whether the invocation went through `spawn_detached`.
    pub detached: bool,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.state).invocations.clone()
    }

    /// Returns the invocations whose command string contains `needle`.
    #[must_use]
    pub fn invocations_containing(&self, needle: &str) -> Vec<CommandInvocation> {
        self.invocations()
            .into_iter()
            .filter(|invocation| invocation.command_string().contains(needle))
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.state).responses.push_back(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }

    /// Pushes a runner error (for example a deadline expiry).
    pub fn push_error(&self, error: RunnerError) {
        lock(&self.state).responses.push_back(Err(error));
    }

    /// Pushes a deadline expiry for `program`.
    pub fn push_timeout(&self, program: &str) {
        self.push_error(RunnerError::Timeout {
            program: program.to_owned(),
            timeout: Duration::from_secs(1),
        });
    }

    /// Queues the outcome of the next detached spawn.
    pub fn push_spawn(&self, outcome: SpawnOutcome) {
        lock(&self.state).spawns.push_back(Ok(outcome));
    }

    /// Queues a spawn failure for the next detached spawn.
    pub fn push_spawn_error(&self, error: RunnerError) {
        lock(&self.state).spawns.push_back(Err(error));
    }

    /// Number of queued `run` responses not yet consumed.
    #[must_use]
    pub fn pending_responses(&self) -> usize {
        lock(&self.state).responses.len()
    }

    fn record(&self, program: &str, args: &[OsString], timeout: Duration, detached: bool) {
        lock(&self.state).invocations.push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            timeout,
            detached,
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, RunnerError> {
        self.record(program, args, timeout, false);
        lock(&self.state)
            .responses
            .pop_front()
            .unwrap_or_else(|| {
                Err(RunnerError::Spawn {
                    program: program.to_owned(),
                    message: String::from("no scripted response available"),
                })
            })
    }

    fn spawn_detached(
        &self,
        program: &str,
        args: &[OsString],
        grace: Duration,
    ) -> Result<SpawnOutcome, RunnerError> {
        self.record(program, args, grace, true);
        lock(&self.state).spawns.pop_front().unwrap_or_else(|| {
            Err(RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted spawn available"),
            })
        })
    }
}

/// Errors produced by [`ScriptedInstanceBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedBackendError {
    /// The scripted provider refused the request.
    #[error("scripted provider rejected the request")]
    Rejected,
    /// The scripted request never got an answer.
    #[error("scripted provider did not answer in time")]
    Timeout,
    /// No scripted describe result was queued.
    #[error("no scripted describe result available")]
    Exhausted,
}

/// Scripted instance backend that records calls.
///
/// Describe results are consumed in FIFO order, except that the last queued
/// result repeats forever so polling loops can be driven to their deadline.
#[derive(Clone, Debug, Default)]
pub struct ScriptedInstanceBackend {
    state: Arc<Mutex<BackendState>>,
}

#[derive(Debug, Default)]
struct BackendState {
    describes: VecDeque<Result<InstanceState, ScriptedBackendError>>,
    starts: VecDeque<Result<(), ScriptedBackendError>>,
    describe_calls: usize,
    start_calls: usize,
}

impl ScriptedInstanceBackend {
    /// Creates a backend with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a state for the next describe call.
    pub fn push_state(&self, state: InstanceState) {
        lock(&self.state).describes.push_back(Ok(state));
    }

    /// Queues a describe failure.
    pub fn push_describe_error(&self, error: ScriptedBackendError) {
        lock(&self.state).describes.push_back(Err(error));
    }

    /// Queues the result of the next start call. Unqueued starts succeed.
    pub fn push_start(&self, result: Result<(), ScriptedBackendError>) {
        lock(&self.state).starts.push_back(result);
    }

    /// Number of describe calls observed.
    #[must_use]
    pub fn describe_calls(&self) -> usize {
        lock(&self.state).describe_calls
    }

    /// Number of start calls observed.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        lock(&self.state).start_calls
    }
}

impl InstanceBackend for ScriptedInstanceBackend {
    type Error = ScriptedBackendError;

    fn describe<'a>(
        &'a self,
        _target: &'a InstanceTarget,
    ) -> BackendFuture<'a, InstanceState, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.describe_calls += 1;
            if state.describes.len() > 1 {
                return state
                    .describes
                    .pop_front()
                    .unwrap_or(Err(ScriptedBackendError::Exhausted));
            }
            state
                .describes
                .front()
                .cloned()
                .unwrap_or(Err(ScriptedBackendError::Exhausted))
        })
    }

    fn start<'a>(&'a self, _target: &'a InstanceTarget) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.start_calls += 1;
            state.starts.pop_front().unwrap_or(Ok(()))
        })
    }

    fn is_transient(err: &Self::Error) -> bool {
        matches!(err, ScriptedBackendError::Timeout)
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
