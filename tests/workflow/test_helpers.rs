//! Shared fixtures for workflow behavioural tests.

use code_remote::test_support::{ScriptedInstanceBackend, ScriptedRunner};
use code_remote::{
    ConfigOverrides, FailureKind, ForwardingReport, LauncherConfig, SshShell, WorkflowConfig,
    WorkflowError, WorkflowReport, WorkflowStage,
};
use rstest::fixture;

/// Number of SSH probes allowed before connectivity is declared lost.
pub const CONNECT_ATTEMPTS: u32 = 3;

/// Result of one workflow run, reduced to what the assertions need.
#[derive(Clone, Debug)]
pub enum Outcome {
    Launched(Box<WorkflowReport>),
    ForwardingVerified(ForwardingReport),
    Failed {
        kind: FailureKind,
        stage: WorkflowStage,
        message: String,
    },
}

impl From<WorkflowError> for Outcome {
    fn from(err: WorkflowError) -> Self {
        Self::Failed {
            kind: err.kind,
            stage: err.stage,
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkflowContext {
    pub backend: ScriptedInstanceBackend,
    pub remote: ScriptedRunner,
    pub local: ScriptedRunner,
    pub overrides: ConfigOverrides,
    pub outcome: Option<Outcome>,
}

impl WorkflowContext {
    pub fn config(&self, project_folder: &str) -> Result<WorkflowConfig, String> {
        WorkflowConfig::builder(LauncherConfig {
            instance: String::from("dev-box"),
            poll_interval_secs: 0,
            ready_timeout_secs: 1,
            start_retry_backoff_secs: 0,
            connect_retry_delay_secs: 0,
            connect_attempts: CONNECT_ATTEMPTS,
            launch_grace_millis: 0,
            ..LauncherConfig::default()
        })
        .project_folder(project_folder)
        .overrides(self.overrides.clone())
        .build()
        .map_err(|err| err.to_string())
    }

    pub fn shell(&self) -> SshShell<ScriptedRunner> {
        SshShell::new("ssh", "dev-box", self.remote.clone())
    }
}

#[fixture]
pub fn workflow_context() -> WorkflowContext {
    WorkflowContext {
        backend: ScriptedInstanceBackend::new(),
        remote: ScriptedRunner::new(),
        local: ScriptedRunner::new(),
        overrides: ConfigOverrides::default(),
        outcome: None,
    }
}
