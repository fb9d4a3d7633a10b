//! Sequences the launcher workflow.
//!
//! The orchestrator owns one component per step and runs them strictly in
//! order: instance, connectivity, repository, editor. The first
//! unrecoverable failure halts the run and is classified into a
//! [`WorkflowError`] carrying the stage that was reached.

use std::fmt;

use tracing::{info, warn};

use crate::availability::{AvailabilityChecker, AvailabilityError};
use crate::backend::{InstanceBackend, InstanceTarget};
use crate::config::WorkflowConfig;
use crate::connectivity::{ConnectivityVerifier, ForwardingStatus};
use crate::launcher::SessionLauncher;
use crate::process::CommandRunner;
use crate::remote::RemoteShell;
use crate::repository::{RepositoryError, RepositoryProvisioner};

mod error;
mod report;

pub use error::{FailureKind, FailureSource, WorkflowError};
pub use report::{ForwardingReport, WorkflowReport};

/// Progress through the workflow. Transitions only move forward.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum WorkflowStage {
    /// Nothing has completed yet.
    Init,
    /// The instance is running.
    InstanceReady,
    /// The instance accepts SSH commands.
    ConnectivityOk,
    /// The repository is available on the instance.
    RepoReady,
    /// The editor was launched.
    Launched,
}

impl WorkflowStage {
    /// Steps completed when this stage has been reached, for progress
    /// reports.
    #[must_use]
    pub fn completed_steps(self) -> Vec<&'static str> {
        [
            (Self::InstanceReady, "instance is running"),
            (Self::ConnectivityOk, "SSH connectivity verified"),
            (Self::RepoReady, "repository is present"),
            (Self::Launched, "editor launched"),
        ]
        .into_iter()
        .filter(|(stage, _)| *stage <= self)
        .map(|(_, step)| step)
        .collect()
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::InstanceReady => "instance-ready",
            Self::ConnectivityOk => "connectivity-ok",
            Self::RepoReady => "repo-ready",
            Self::Launched => "launched",
        };
        f.write_str(name)
    }
}

/// Runs the workflow against one instance.
#[derive(Debug)]
pub struct WorkflowOrchestrator<B, S, R: CommandRunner> {
    target: InstanceTarget,
    forwarding: bool,
    availability: AvailabilityChecker<B>,
    connectivity: ConnectivityVerifier,
    repository: RepositoryProvisioner,
    launcher: SessionLauncher<R>,
    shell: S,
}

impl<B, S, R> WorkflowOrchestrator<B, S, R>
where
    B: InstanceBackend,
    S: RemoteShell,
    R: CommandRunner,
{
    /// Wires the components from `config`. `runner` launches the editor.
    #[must_use]
    pub fn new(config: &WorkflowConfig, backend: B, shell: S, runner: R) -> Self {
        Self {
            target: config.target().clone(),
            forwarding: config.ssh_forwarding(),
            availability: AvailabilityChecker::new(backend, config.availability_settings()),
            connectivity: ConnectivityVerifier::new(config.connectivity_settings()),
            repository: RepositoryProvisioner::new(config.layout(), config.repository_settings()),
            launcher: SessionLauncher::new(
                runner,
                config.editor_bin(),
                config.timings().launch_grace,
                config.ssh_forwarding(),
            ),
            shell,
        }
    }

    /// Runs every step and launches the editor.
    ///
    /// A broken forwarding check is only a warning here.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] describing the first failed step.
    pub async fn execute(&self) -> Result<WorkflowReport, WorkflowError> {
        let availability = self
            .availability
            .ensure_running(&self.target)
            .await
            .map_err(|err| instance_failure(err, WorkflowStage::Init))?;

        let connectivity = self
            .connectivity
            .verify(&self.shell)
            .await
            .map_err(|err| {
                WorkflowError::new(
                    FailureKind::ConnectivityUnreachable,
                    WorkflowStage::InstanceReady,
                    err,
                )
            })?;

        let forwarding = self.forwarding.then(|| {
            let status = self.connectivity.check_forwarding(&self.shell);
            if let ForwardingStatus::Broken { reason } = &status {
                warn!(%reason, "continuing without working SSH agent forwarding");
            }
            status
        });

        let repository = self
            .repository
            .provision(&self.shell)
            .map_err(|err| repository_failure(err, WorkflowStage::ConnectivityOk))?;

        let remote_path = self.repository.layout().remote_path().to_owned();
        let launch = self
            .launcher
            .launch(self.shell.editor_host(), &remote_path)
            .map_err(|err| {
                WorkflowError::new(FailureKind::LaunchFailed, WorkflowStage::RepoReady, err)
            })?;

        info!(instance = %self.target.name, path = %remote_path, "workflow complete");
        Ok(WorkflowReport {
            availability,
            connectivity,
            forwarding,
            repository,
            remote_path,
            launch,
        })
    }

    /// Runs the instance and connectivity steps, then checks forwarding and
    /// stops. The forwarding result alone decides success.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] for instance or connectivity failures and
    /// [`FailureKind::ForwardingBroken`] when forwarding does not work.
    pub async fn test_forwarding(&self) -> Result<ForwardingReport, WorkflowError> {
        let availability = self
            .availability
            .ensure_running(&self.target)
            .await
            .map_err(|err| instance_failure(err, WorkflowStage::Init))?;

        let connectivity = self
            .connectivity
            .verify(&self.shell)
            .await
            .map_err(|err| {
                WorkflowError::new(
                    FailureKind::ConnectivityUnreachable,
                    WorkflowStage::InstanceReady,
                    err,
                )
            })?;

        match self.connectivity.check_forwarding(&self.shell) {
            ForwardingStatus::Working { identities } => Ok(ForwardingReport {
                availability,
                connectivity,
                identities,
            }),
            ForwardingStatus::Broken { reason } => Err(WorkflowError::message(
                FailureKind::ForwardingBroken,
                WorkflowStage::ConnectivityOk,
                format!("SSH agent forwarding is not working: {reason}"),
            )),
        }
    }
}

fn instance_failure<E>(err: AvailabilityError<E>, stage: WorkflowStage) -> WorkflowError
where
    E: std::error::Error + Send + Sync + 'static,
{
    WorkflowError::new(FailureKind::InstanceUnavailable, stage, err)
}

fn repository_failure(err: RepositoryError, stage: WorkflowStage) -> WorkflowError {
    let kind = match &err {
        RepositoryError::CloneFailed { .. } => FailureKind::CloneFailed,
        RepositoryError::Missing { .. }
        | RepositoryError::Incomplete { .. }
        | RepositoryError::Query { .. }
        | RepositoryError::Remote(_) => FailureKind::RepositoryMissing,
    };
    WorkflowError::new(kind, stage, err)
}

#[cfg(test)]
mod tests;
