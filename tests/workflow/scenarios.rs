//! BDD scenarios for the launch workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{WorkflowContext, workflow_context};

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Running instance is used as it is"
)]
fn scenario_running_instance(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Stopped instance is started, cloned and launched"
)]
fn scenario_stopped_instance(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Connectivity retries are exhausted"
)]
fn scenario_connectivity_exhausted(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Absent repository without automatic cloning"
)]
fn scenario_no_auto_clone(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Forwarding test reports a broken agent"
)]
fn scenario_forwarding_broken(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}

#[scenario(
    path = "tests/features/workflow.feature",
    name = "Forwarding test passes with a loaded agent"
)]
fn scenario_forwarding_verified(workflow_context: WorkflowContext) {
    let _ = workflow_context;
}
