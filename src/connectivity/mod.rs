//! SSH reachability and agent-forwarding checks.
//!
//! A freshly started instance can report running well before `sshd` accepts
//! connections, so the probe is retried a bounded number of times with a
//! fixed delay between attempts.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::remote::{RemoteCommand, RemoteShell};

/// Remote no-op used to prove a command can be executed.
pub const PROBE_COMMAND: &str = "true";

/// Remote command that lists identities offered by the forwarded agent.
pub const FORWARDING_CHECK_COMMAND: &str = "ssh-add -l";

/// Retry and deadline policy for [`ConnectivityVerifier`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivitySettings {
    /// Maximum number of probe attempts. Always at least one.
    pub attempts: u32,
    /// Delay between failed attempts.
    pub retry_delay: Duration,
    /// Deadline for each probe.
    pub probe_timeout: Duration,
    /// Deadline for the forwarding check.
    pub forwarding_timeout: Duration,
}

/// Outcome of a successful reachability check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivityReport {
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Result of the agent forwarding check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForwardingStatus {
    /// The remote side sees at least one forwarded identity.
    Working {
        /// Identity lines reported by `ssh-add -l`.
        identities: Vec<String>,
    },
    /// Forwarding is not usable.
    Broken {
        /// Why the check failed.
        reason: String,
    },
}

impl ForwardingStatus {
    /// Returns `true` when forwarding works.
    #[must_use]
    pub const fn is_working(&self) -> bool {
        matches!(self, Self::Working { .. })
    }
}

/// Errors raised by the reachability check.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectivityError {
    /// Raised when every probe attempt failed.
    #[error("instance unreachable over SSH after {attempts} attempts: {last_failure}")]
    Unreachable {
        /// Attempts made.
        attempts: u32,
        /// Failure reported by the final attempt.
        last_failure: String,
    },
}

/// Checks that commands can be executed on the instance.
#[derive(Clone, Copy, Debug)]
pub struct ConnectivityVerifier {
    settings: ConnectivitySettings,
}

impl ConnectivityVerifier {
    /// Creates a verifier. A zero attempt count is raised to one.
    #[must_use]
    pub fn new(settings: ConnectivitySettings) -> Self {
        Self {
            settings: ConnectivitySettings {
                attempts: settings.attempts.max(1),
                ..settings
            },
        }
    }

    /// Runs the no-op probe until it succeeds or the attempts run out. No
    /// delay follows the final attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::Unreachable`] after exactly
    /// `attempts` failed probes.
    pub async fn verify<S: RemoteShell>(
        &self,
        shell: &S,
    ) -> Result<ConnectivityReport, ConnectivityError> {
        let probe = RemoteCommand::new(PROBE_COMMAND, self.settings.probe_timeout);
        let mut last_failure = String::new();

        for attempt in 1..=self.settings.attempts {
            match shell.run(&probe) {
                Ok(output) if output.is_success() => {
                    info!(attempt, "instance reachable over SSH");
                    return Ok(ConnectivityReport { attempts: attempt });
                }
                Ok(output) => last_failure = output.failure_detail(),
                Err(err) => last_failure = err.to_string(),
            }

            warn!(
                attempt,
                max_attempts = self.settings.attempts,
                failure = %last_failure,
                "SSH probe failed"
            );
            if attempt < self.settings.attempts {
                sleep(self.settings.retry_delay).await;
            }
        }

        Err(ConnectivityError::Unreachable {
            attempts: self.settings.attempts,
            last_failure,
        })
    }

    /// Asks the remote side to list identities from the forwarded agent.
    /// Never fails; transport problems are reported as broken forwarding.
    #[must_use]
    pub fn check_forwarding<S: RemoteShell>(&self, shell: &S) -> ForwardingStatus {
        let command = RemoteCommand::new(FORWARDING_CHECK_COMMAND, self.settings.forwarding_timeout)
            .forward_agent(true);
        let status = match shell.run(&command) {
            Ok(output) => classify_agent_listing(output.exit_code, &output.stdout, &output.stderr),
            Err(err) => ForwardingStatus::Broken {
                reason: err.to_string(),
            },
        };

        match &status {
            ForwardingStatus::Working { identities } => {
                info!(identities = identities.len(), "SSH agent forwarding works");
            }
            ForwardingStatus::Broken { reason } => {
                warn!(%reason, "SSH agent forwarding is not working");
            }
        }
        status
    }
}

/// Interprets `ssh-add -l` output. Exit 1 means the agent is reachable but
/// empty; exit 2 means no agent is reachable at all.
fn classify_agent_listing(exit_code: Option<i32>, stdout: &str, stderr: &str) -> ForwardingStatus {
    let identities: Vec<String> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    match exit_code {
        Some(0) if stdout.to_ascii_lowercase().contains("no identities") => {
            ForwardingStatus::Broken {
                reason: String::from("the forwarded agent has no identities"),
            }
        }
        Some(0) if !identities.is_empty() => ForwardingStatus::Working { identities },
        Some(0) => ForwardingStatus::Broken {
            reason: String::from("the forwarded agent listed no keys"),
        },
        Some(1) => ForwardingStatus::Broken {
            reason: String::from("the forwarded agent has no identities"),
        },
        Some(2) => ForwardingStatus::Broken {
            reason: String::from("could not open a connection to a forwarded authentication agent"),
        },
        Some(code) => ForwardingStatus::Broken {
            reason: detail(format!("ssh-add exited with status {code}"), stderr),
        },
        None => ForwardingStatus::Broken {
            reason: detail(String::from("ssh-add terminated without an exit status"), stderr),
        },
    }
}

fn detail(message: String, stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        message
    } else {
        format!("{message}: {trimmed}")
    }
}
