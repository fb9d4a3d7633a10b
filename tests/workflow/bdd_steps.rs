//! BDD step definitions for the launch workflow.

use code_remote::test_support::ScriptedRunner;
use code_remote::{InstanceState, SpawnOutcome, WorkflowOrchestrator};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{Outcome, WorkflowContext};

const IDENTITY: &str = "256 SHA256:abc me@laptop (ED25519)\n";
const UNREACHABLE: i32 = 255;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("failed to prepare the workflow: {0}")]
    Setup(String),
}

#[given("the instance reports RUNNING")]
fn instance_running(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.backend.push_state(InstanceState::Running);
    workflow_context
}

#[given("the instance reports STOPPED until it is started")]
fn instance_stopped(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.backend.push_state(InstanceState::Stopped);
    workflow_context.backend.push_state(InstanceState::Running);
    workflow_context
}

#[given("the instance accepts SSH on the first attempt")]
fn ssh_first_attempt(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.remote.push_success();
    workflow_context
}

#[given("the instance accepts SSH on the second attempt")]
fn ssh_second_attempt(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.remote.push_exit_code(UNREACHABLE);
    workflow_context.remote.push_success();
    workflow_context
}

#[given("the instance refuses SSH")]
fn ssh_refused(workflow_context: WorkflowContext) -> WorkflowContext {
    for _ in 0..super::test_helpers::CONNECT_ATTEMPTS {
        workflow_context.remote.push_exit_code(UNREACHABLE);
    }
    workflow_context
}

#[given("the SSH agent lists one identity")]
fn agent_with_identity(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.remote.push_output(Some(0), IDENTITY, "");
    workflow_context
}

#[given("the SSH agent is unreachable on the instance")]
fn agent_unreachable(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.remote.push_output(
        Some(2),
        "",
        "Could not open a connection to your authentication agent.",
    );
    workflow_context
}

#[given("the repository is already checked out")]
fn repository_present(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.remote.push_output(
        Some(0),
        "state=repository\norigin=git@github.com:recogni/widgets.git\n",
        "",
    );
    workflow_context
        .remote
        .push_output(Some(0), "branch=main\ndirty=false\n", "");
    workflow_context
}

#[given("the repository is absent")]
fn repository_absent(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context
        .remote
        .push_output(Some(0), "state=absent\n", "");
    workflow_context.remote.push_success();
    workflow_context
        .remote
        .push_output(Some(0), "branch=main\ndirty=false\n", "");
    workflow_context
}

#[given("SSH agent forwarding is disabled")]
fn forwarding_disabled(mut workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.overrides.no_ssh_forwarding = true;
    workflow_context
}

#[given("automatic cloning is disabled")]
fn auto_clone_disabled(mut workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.overrides.no_auto_clone = true;
    workflow_context
}

#[given("forwarding test mode is enabled")]
fn test_mode_enabled(mut workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.overrides.test_ssh_forwarding = true;
    workflow_context
}

#[when("I launch the project \"{folder}\"")]
fn launch_project(
    mut workflow_context: WorkflowContext,
    folder: String,
) -> Result<WorkflowContext, StepError> {
    let config = workflow_context
        .config(&folder)
        .map_err(StepError::Setup)?;
    workflow_context.local.push_spawn(SpawnOutcome::Running);

    let orchestrator = WorkflowOrchestrator::new(
        &config,
        workflow_context.backend.clone(),
        workflow_context.shell(),
        workflow_context.local.clone(),
    );
    let runtime = tokio::runtime::Runtime::new().map_err(|err| StepError::Setup(err.to_string()))?;
    let outcome = runtime.block_on(async {
        if config.test_forwarding() {
            orchestrator
                .test_forwarding()
                .await
                .map_or_else(Outcome::from, Outcome::ForwardingVerified)
        } else {
            orchestrator
                .execute()
                .await
                .map_or_else(Outcome::from, |report| Outcome::Launched(Box::new(report)))
        }
    });

    workflow_context.outcome = Some(outcome);
    Ok(workflow_context)
}

fn launched_uri(workflow_context: &WorkflowContext) -> Result<String, StepError> {
    match &workflow_context.outcome {
        Some(Outcome::Launched(report)) => Ok(report.launch.uri.clone()),
        other => Err(StepError::Assertion(format!(
            "expected a launched session, got {other:?}"
        ))),
    }
}

#[then("the launch succeeds")]
fn launch_succeeds(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    launched_uri(workflow_context).map(|_| ())
}

#[then("the launch fails with \"{kind}\"")]
fn launch_fails_with(workflow_context: &WorkflowContext, kind: String) -> Result<(), StepError> {
    match &workflow_context.outcome {
        Some(Outcome::Failed { kind: actual, .. }) if actual.as_str() == kind => Ok(()),
        Some(Outcome::Failed {
            kind: actual,
            message,
            ..
        }) => Err(StepError::Assertion(format!(
            "expected {kind} failure, got {actual}: {message}"
        ))),
        other => Err(StepError::Assertion(format!(
            "expected {kind} failure, got {other:?}"
        ))),
    }
}

#[then("forwarding is verified with {count} identity")]
fn forwarding_verified(workflow_context: &WorkflowContext, count: usize) -> Result<(), StepError> {
    match &workflow_context.outcome {
        Some(Outcome::ForwardingVerified(report)) => {
            expect_count("identities", report.identities.len(), count)
        }
        other => Err(StepError::Assertion(format!(
            "expected a forwarding report, got {other:?}"
        ))),
    }
}

#[then("the run stopped after \"{stage}\"")]
fn run_stopped_after(workflow_context: &WorkflowContext, stage: String) -> Result<(), StepError> {
    match &workflow_context.outcome {
        Some(Outcome::Failed { stage: actual, .. }) if actual.to_string() == stage => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected the run to stop after {stage}, got {other:?}"
        ))),
    }
}

#[then("no start request was sent")]
fn no_start(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    expect_count("start requests", workflow_context.backend.start_calls(), 0)
}

#[then("exactly one start request was sent")]
fn one_start(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    expect_count("start requests", workflow_context.backend.start_calls(), 1)
}

#[then("no clone was attempted")]
fn no_clone(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    expect_count("clones", clones(&workflow_context.remote).len(), 0)
}

#[then("the repository was cloned from \"{url}\"")]
fn cloned_from(workflow_context: &WorkflowContext, url: String) -> Result<(), StepError> {
    let clones = clones(&workflow_context.remote);
    expect_count("clones", clones.len(), 1)?;
    if clones.iter().any(|command| command.contains(&url)) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "clone did not use {url}: {clones:?}"
        )))
    }
}

#[then("SSH was attempted {count} times")]
fn ssh_attempts(workflow_context: &WorkflowContext, count: usize) -> Result<(), StepError> {
    expect_count(
        "SSH invocations",
        workflow_context.remote.invocations().len(),
        count,
    )
}

#[then("the editor opened \"{uri}\"")]
fn editor_opened(workflow_context: &WorkflowContext, uri: String) -> Result<(), StepError> {
    let reported = launched_uri(workflow_context)?;
    let spawned = workflow_context.local.invocations();
    let opened = spawned
        .iter()
        .any(|invocation| invocation.detached && invocation.command_string().ends_with(&uri));
    if reported == uri && opened {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected editor on {uri}, reported {reported}, spawned {spawned:?}"
        )))
    }
}

#[then("the editor was not opened")]
fn editor_not_opened(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    expect_count("editor launches", workflow_context.local.invocations().len(), 0)
}

fn clones(remote: &ScriptedRunner) -> Vec<String> {
    remote
        .invocations_containing("git clone")
        .iter()
        .map(|invocation| invocation.command_string())
        .collect()
}

fn expect_count(what: &str, actual: usize, expected: usize) -> Result<(), StepError> {
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected} {what}, observed {actual}"
        )))
    }
}
