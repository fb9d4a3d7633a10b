//! Core library for the `code-remote` launcher.
//!
//! The crate connects a local editor to one named cloud development
//! instance: it makes sure the instance is running, checks that it accepts
//! SSH commands (and optionally that agent forwarding works), ensures the
//! project repository is checked out there, and opens the editor's remote
//! session on it. External tools sit behind narrow traits with explicit
//! deadlines so the workflow can be driven by scripted doubles in tests.

pub mod availability;
pub mod backend;
pub mod config;
pub mod connectivity;
pub mod gcloud;
pub mod launcher;
pub mod process;
pub mod remote;
pub mod repository;
pub mod test_support;
pub mod workflow;

pub use availability::{
    AvailabilityChecker, AvailabilityError, AvailabilityReport, AvailabilitySettings,
};
pub use backend::{BackendError, BackendFuture, InstanceBackend, InstanceState, InstanceTarget};
pub use config::{
    ConfigError, ConfigOverrides, LauncherConfig, WorkflowConfig, WorkflowConfigBuilder,
    WorkflowTimings,
};
pub use connectivity::{
    ConnectivityError, ConnectivityReport, ConnectivitySettings, ConnectivityVerifier,
    ForwardingStatus,
};
pub use gcloud::{GcloudBackend, GcloudError, GcloudSettings};
pub use launcher::{LaunchError, LaunchReport, SessionLauncher, folder_uri, forwarding_instructions};
pub use process::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError, SpawnOutcome};
pub use remote::{
    GcloudShell, RemoteCommand, RemoteCommandOutput, RemoteError, RemoteShell, SshShell, Transport,
};
pub use repository::{
    PartialCheckout, RepositoryError, RepositoryLayout, RepositoryPresence, RepositoryProvisioner,
    RepositoryReport, RepositorySettings, RepositoryStatus,
};
pub use workflow::{
    FailureKind, ForwardingReport, WorkflowError, WorkflowOrchestrator, WorkflowReport,
    WorkflowStage,
};
