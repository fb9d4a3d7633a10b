//! Ensures the target instance is running before anything else happens.
//!
//! A running instance is left untouched. A stopped or terminated one gets a
//! single start request (the only step in the workflow that mutates cloud
//! state, so it is announced), after which the state is polled until it
//! reports running or the readiness deadline passes.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::{InstanceBackend, InstanceState, InstanceTarget};

/// Timing policy for [`AvailabilityChecker`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AvailabilitySettings {
    /// Delay between state polls after a start.
    pub poll_interval: Duration,
    /// How long to wait for the instance to report running.
    pub ready_timeout: Duration,
    /// Delay before the single retry of a start request that went unanswered.
    pub start_retry_backoff: Duration,
}

/// Outcome of a successful availability check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvailabilityReport {
    /// State observed before any action was taken.
    pub initial_state: InstanceState,
    /// Whether a start request was issued.
    pub started: bool,
    /// Number of state polls made after the initial query.
    pub polls: usize,
}

/// Errors raised while making the instance available.
#[derive(Debug, Error)]
pub enum AvailabilityError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Raised when the initial state query fails.
    #[error("failed to query instance state: {0}")]
    Query(#[source] BackendError),
    /// Raised when the instance is in a state a start cannot fix.
    #[error("instance is {state} and cannot be started automatically")]
    NotStartable {
        /// State reported by the provider.
        state: InstanceState,
    },
    /// Raised when the provider refuses to start the instance.
    #[error("cannot start instance: {0}")]
    StartRejected(#[source] BackendError),
    /// Raised when the instance does not report running in time.
    #[error("instance did not become ready within {} seconds (last state: {last_state})", .waited.as_secs())]
    NotReady {
        /// Deadline that elapsed.
        waited: Duration,
        /// Last state observed while polling.
        last_state: InstanceState,
    },
}

/// Queries and, if needed, starts a single instance.
#[derive(Clone, Debug)]
pub struct AvailabilityChecker<B> {
    backend: B,
    settings: AvailabilitySettings,
}

impl<B: InstanceBackend> AvailabilityChecker<B> {
    /// Creates a checker.
    #[must_use]
    pub const fn new(backend: B, settings: AvailabilitySettings) -> Self {
        Self { backend, settings }
    }

    /// Makes sure `target` is running, starting it when it is stopped or
    /// terminated.
    ///
    /// # Errors
    ///
    /// Returns [`AvailabilityError`] when the state cannot be queried, the
    /// instance cannot be started, or it does not become ready in time.
    pub async fn ensure_running(
        &self,
        target: &InstanceTarget,
    ) -> Result<AvailabilityReport, AvailabilityError<B::Error>> {
        let initial_state = self
            .backend
            .describe(target)
            .await
            .map_err(AvailabilityError::Query)?;
        info!(instance = %target.name, state = %initial_state, "instance status");

        if initial_state == InstanceState::Running {
            return Ok(AvailabilityReport {
                initial_state,
                started: false,
                polls: 0,
            });
        }

        let started = if initial_state.is_startable() {
            warn!(instance = %target, state = %initial_state, "starting instance");
            self.start(target).await?;
            true
        } else if initial_state == InstanceState::Starting {
            false
        } else {
            return Err(AvailabilityError::NotStartable {
                state: initial_state,
            });
        };

        let polls = self.wait_until_running(target, &initial_state).await?;
        info!(instance = %target.name, polls, "instance is running");
        Ok(AvailabilityReport {
            initial_state,
            started,
            polls,
        })
    }

    async fn start(&self, target: &InstanceTarget) -> Result<(), AvailabilityError<B::Error>> {
        match self.backend.start(target).await {
            Ok(()) => Ok(()),
            Err(err) if B::is_transient(&err) => {
                warn!(
                    instance = %target.name,
                    error = %err,
                    backoff_secs = self.settings.start_retry_backoff.as_secs(),
                    "start request went unanswered; retrying once"
                );
                sleep(self.settings.start_retry_backoff).await;
                self.backend
                    .start(target)
                    .await
                    .map_err(AvailabilityError::StartRejected)
            }
            Err(err) => Err(AvailabilityError::StartRejected(err)),
        }
    }

    async fn wait_until_running(
        &self,
        target: &InstanceTarget,
        initial_state: &InstanceState,
    ) -> Result<usize, AvailabilityError<B::Error>> {
        let deadline = Instant::now() + self.settings.ready_timeout;
        let mut last_state = initial_state.clone();
        let mut polls = 0;

        while Instant::now() <= deadline {
            polls += 1;
            match self.backend.describe(target).await {
                Ok(InstanceState::Running) => return Ok(polls),
                Ok(state) => {
                    info!(instance = %target.name, state = %state, "waiting for instance");
                    last_state = state;
                }
                Err(err) => {
                    warn!(instance = %target.name, error = %err, "state poll failed; will retry");
                }
            }
            sleep(self.settings.poll_interval).await;
        }

        Err(AvailabilityError::NotReady {
            waited: self.settings.ready_timeout,
            last_state,
        })
    }
}
