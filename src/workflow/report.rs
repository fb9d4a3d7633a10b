//! What a workflow run did, for the CLI to report.

use crate::availability::AvailabilityReport;
use crate::connectivity::{ConnectivityReport, ForwardingStatus};
use crate::launcher::LaunchReport;
use crate::repository::RepositoryReport;

/// Outcome of a complete run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkflowReport {
    /// Instance step.
    pub availability: AvailabilityReport,
    /// Connectivity step.
    pub connectivity: ConnectivityReport,
    /// Forwarding check result, when forwarding is enabled.
    pub forwarding: Option<ForwardingStatus>,
    /// Repository step.
    pub repository: RepositoryReport,
    /// Remote path opened in the editor.
    pub remote_path: String,
    /// Launch step.
    pub launch: LaunchReport,
}

/// Outcome of a forwarding-only run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForwardingReport {
    /// Instance step.
    pub availability: AvailabilityReport,
    /// Connectivity step.
    pub connectivity: ConnectivityReport,
    /// Identities visible through the forwarded agent.
    pub identities: Vec<String>,
}
