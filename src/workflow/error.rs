//! Classified workflow failures.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use super::WorkflowStage;

/// Category of a workflow failure. Each maps onto a distinct exit code.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FailureKind {
    /// The instance is not running and could not be made to run.
    InstanceUnavailable,
    /// The instance never accepted an SSH command.
    ConnectivityUnreachable,
    /// SSH agent forwarding does not work (forwarding test mode only).
    ForwardingBroken,
    /// The repository is absent, incomplete or could not be inspected.
    RepositoryMissing,
    /// Cloning the repository failed.
    CloneFailed,
    /// The editor could not be launched.
    LaunchFailed,
    /// The configuration or command line is invalid.
    ConfigurationInvalid,
}

impl FailureKind {
    /// Process exit code for this failure.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::ConfigurationInvalid => 2,
            Self::InstanceUnavailable => 3,
            Self::ConnectivityUnreachable => 4,
            Self::ForwardingBroken => 5,
            Self::RepositoryMissing => 6,
            Self::CloneFailed => 7,
            Self::LaunchFailed => 8,
        }
    }

    /// Short kebab-case name used in error reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InstanceUnavailable => "instance-unavailable",
            Self::ConnectivityUnreachable => "connectivity-unreachable",
            Self::ForwardingBroken => "forwarding-broken",
            Self::RepositoryMissing => "repository-missing",
            Self::CloneFailed => "clone-failed",
            Self::LaunchFailed => "launch-failed",
            Self::ConfigurationInvalid => "configuration-invalid",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed component error carried as the failure's source.
pub type FailureSource = Box<dyn StdError + Send + Sync + 'static>;

/// The first unrecoverable failure of a workflow run.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct WorkflowError {
    /// Failure category.
    pub kind: FailureKind,
    /// Last stage completed before the failure.
    pub stage: WorkflowStage,
    /// Human-readable cause.
    pub message: String,
    /// Component error, when there is one.
    #[source]
    pub source: Option<FailureSource>,
}

impl WorkflowError {
    /// Classifies a component error.
    #[must_use]
    pub fn new<E>(kind: FailureKind, stage: WorkflowStage, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind,
            stage,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a failure that has no underlying component error.
    #[must_use]
    pub fn message(kind: FailureKind, stage: WorkflowStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            source: None,
        }
    }

    /// Process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}
