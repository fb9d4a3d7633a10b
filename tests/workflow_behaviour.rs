//! Behavioural scenarios for the launch workflow.

mod workflow;
