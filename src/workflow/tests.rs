//! Tests for the workflow orchestrator.

use super::*;
use crate::backend::InstanceState;
use crate::config::{ConfigOverrides, LauncherConfig};
use crate::process::SpawnOutcome;
use crate::remote::SshShell;
use crate::test_support::{ScriptedInstanceBackend, ScriptedRunner};
use rstest::{fixture, rstest};

const IDENTITY: &str = "256 SHA256:abc me@laptop (ED25519)\n";

struct Harness {
    backend: ScriptedInstanceBackend,
    remote: ScriptedRunner,
    local: ScriptedRunner,
}

impl Harness {
    fn orchestrator(
        &self,
        overrides: ConfigOverrides,
    ) -> WorkflowOrchestrator<ScriptedInstanceBackend, SshShell<ScriptedRunner>, ScriptedRunner> {
        let config = WorkflowConfig::builder(LauncherConfig {
            poll_interval_secs: 0,
            ready_timeout_secs: 1,
            start_retry_backoff_secs: 0,
            connect_retry_delay_secs: 0,
            connect_attempts: 3,
            launch_grace_millis: 0,
            ..LauncherConfig::default()
        })
        .project_folder("widgets")
        .overrides(overrides)
        .build()
        .expect("valid config");

        WorkflowOrchestrator::new(
            &config,
            self.backend.clone(),
            SshShell::new("ssh", "dev-box", self.remote.clone()),
            self.local.clone(),
        )
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        backend: ScriptedInstanceBackend::new(),
        remote: ScriptedRunner::new(),
        local: ScriptedRunner::new(),
    }
}

#[rstest]
#[tokio::test]
async fn stopped_instance_is_started_cloned_and_launched(harness: Harness) {
    harness.backend.push_state(InstanceState::Stopped);
    harness.backend.push_state(InstanceState::Running);
    harness.remote.push_exit_code(255);
    harness.remote.push_success();
    harness.remote.push_output(Some(0), IDENTITY, "");
    harness.remote.push_output(Some(0), "state=absent\n", "");
    harness.remote.push_success();
    harness.remote.push_output(Some(0), "branch=main\ndirty=false\n", "");
    harness.local.push_spawn(SpawnOutcome::Running);

    let report = harness
        .orchestrator(ConfigOverrides::default())
        .execute()
        .await
        .expect("workflow succeeds");

    assert_eq!(harness.backend.start_calls(), 1);
    assert_eq!(report.availability.polls, 1);
    assert_eq!(report.connectivity.attempts, 2);
    assert!(report.repository.cloned);
    assert_eq!(harness.remote.invocations_containing("git clone").len(), 1);
    assert_eq!(report.remote_path, "/data/manas/widgets");
    assert_eq!(
        report.launch.uri,
        "vscode-remote://ssh-remote+dev-box/data/manas/widgets"
    );
    assert!(report.launch.instructions.is_some());
    assert_eq!(harness.local.invocations().len(), 1);
}

#[rstest]
#[tokio::test]
async fn unreachable_instance_skips_repository_and_launch(harness: Harness) {
    harness.backend.push_state(InstanceState::Running);
    for _ in 0..3 {
        harness.remote.push_exit_code(255);
    }

    let err = harness
        .orchestrator(ConfigOverrides::default())
        .execute()
        .await
        .expect_err("connectivity fails");

    assert_eq!(err.kind, FailureKind::ConnectivityUnreachable);
    assert_eq!(err.stage, WorkflowStage::InstanceReady);
    assert_eq!(err.exit_code(), 4);
    assert_eq!(harness.backend.start_calls(), 0);
    assert_eq!(harness.remote.invocations().len(), 3);
    assert!(harness.local.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn broken_forwarding_is_only_a_warning_in_a_full_run(harness: Harness) {
    harness.backend.push_state(InstanceState::Running);
    harness.remote.push_success();
    harness.remote.push_output(Some(2), "", "Could not open a connection");
    harness.remote.push_output(Some(0), "state=repository\norigin=git@github.com:recogni/widgets.git\n", "");
    harness.remote.push_output(Some(0), "branch=main\ndirty=false\n", "");
    harness.local.push_spawn(SpawnOutcome::Running);

    let report = harness
        .orchestrator(ConfigOverrides::default())
        .execute()
        .await
        .expect("workflow succeeds");

    assert!(report.forwarding.is_some_and(|status| !status.is_working()));
    assert!(!report.repository.cloned);
}

#[rstest]
#[tokio::test]
async fn forwarding_test_mode_stops_after_connectivity(harness: Harness) {
    harness.backend.push_state(InstanceState::Running);
    harness.remote.push_success();
    harness.remote.push_output(Some(1), "The agent has no identities.\n", "");

    let err = harness
        .orchestrator(ConfigOverrides {
            test_ssh_forwarding: true,
            ..ConfigOverrides::default()
        })
        .test_forwarding()
        .await
        .expect_err("forwarding broken");

    assert_eq!(err.kind, FailureKind::ForwardingBroken);
    assert_eq!(err.stage, WorkflowStage::ConnectivityOk);
    assert_eq!(err.exit_code(), 5);
    assert_eq!(harness.remote.invocations().len(), 2);
    assert!(harness.remote.invocations_containing("state=").is_empty());
    assert!(harness.local.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn forwarding_test_mode_reports_identities(harness: Harness) {
    harness.backend.push_state(InstanceState::Running);
    harness.remote.push_success();
    harness.remote.push_output(Some(0), IDENTITY, "");

    let report = harness
        .orchestrator(ConfigOverrides {
            test_ssh_forwarding: true,
            ..ConfigOverrides::default()
        })
        .test_forwarding()
        .await
        .expect("forwarding works");

    assert_eq!(report.identities.len(), 1);
}

#[rstest]
#[tokio::test]
async fn absent_repository_without_auto_clone_fails(harness: Harness) {
    harness.backend.push_state(InstanceState::Running);
    harness.remote.push_success();
    harness.remote.push_output(Some(0), "state=absent\n", "");

    let err = harness
        .orchestrator(ConfigOverrides {
            no_auto_clone: true,
            no_ssh_forwarding: true,
            ..ConfigOverrides::default()
        })
        .execute()
        .await
        .expect_err("repository missing");

    assert_eq!(err.kind, FailureKind::RepositoryMissing);
    assert_eq!(err.stage, WorkflowStage::ConnectivityOk);
    assert!(harness.remote.invocations_containing("git clone").is_empty());
    assert!(harness.local.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn clone_failure_is_classified(harness: Harness) {
    harness.backend.push_state(InstanceState::Running);
    harness.remote.push_success();
    harness.remote.push_output(Some(0), "state=absent\n", "");
    harness.remote.push_output(Some(128), "", "fatal: repository not found");
    harness.remote.push_output(Some(0), "state=absent\n", "");

    let err = harness
        .orchestrator(ConfigOverrides {
            no_ssh_forwarding: true,
            ..ConfigOverrides::default()
        })
        .execute()
        .await
        .expect_err("clone fails");

    assert_eq!(err.kind, FailureKind::CloneFailed);
    assert_eq!(err.exit_code(), 7);
    assert!(std::error::Error::source(&err).is_some());
}

#[rstest]
#[tokio::test]
async fn instance_failure_is_classified(harness: Harness) {
    harness.backend.push_state(InstanceState::from_status("SUSPENDED"));

    let err = harness
        .orchestrator(ConfigOverrides::default())
        .execute()
        .await
        .expect_err("instance cannot be started");

    assert_eq!(err.kind, FailureKind::InstanceUnavailable);
    assert_eq!(err.stage, WorkflowStage::Init);
    assert!(harness.remote.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn launch_failure_is_classified(harness: Harness) {
    harness.backend.push_state(InstanceState::Running);
    harness.remote.push_success();
    harness.remote.push_output(Some(0), "state=plain\n", "");
    harness.local.push_spawn(SpawnOutcome::Exited { code: Some(1) });

    let err = harness
        .orchestrator(ConfigOverrides {
            no_ssh_forwarding: true,
            ..ConfigOverrides::default()
        })
        .execute()
        .await
        .expect_err("editor exits");

    assert_eq!(err.kind, FailureKind::LaunchFailed);
    assert_eq!(err.stage, WorkflowStage::RepoReady);
}

#[rstest]
#[case(WorkflowStage::Init, 0)]
#[case(WorkflowStage::InstanceReady, 1)]
#[case(WorkflowStage::RepoReady, 3)]
#[case(WorkflowStage::Launched, 4)]
fn completed_steps_follow_stage_order(#[case] stage: WorkflowStage, #[case] expected: usize) {
    assert_eq!(stage.completed_steps().len(), expected);
}

#[rstest]
#[case(FailureKind::ConfigurationInvalid, 2, "configuration-invalid")]
#[case(FailureKind::InstanceUnavailable, 3, "instance-unavailable")]
#[case(FailureKind::ConnectivityUnreachable, 4, "connectivity-unreachable")]
#[case(FailureKind::ForwardingBroken, 5, "forwarding-broken")]
#[case(FailureKind::RepositoryMissing, 6, "repository-missing")]
#[case(FailureKind::CloneFailed, 7, "clone-failed")]
#[case(FailureKind::LaunchFailed, 8, "launch-failed")]
fn failure_kinds_have_distinct_exit_codes(
    #[case] kind: FailureKind,
    #[case] code: i32,
    #[case] name: &str,
) {
    assert_eq!(kind.exit_code(), code);
    assert_eq!(kind.to_string(), name);
}
