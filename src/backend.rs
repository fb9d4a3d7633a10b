//! Backend abstraction for controlling a single named compute instance.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Identifies the one instance a workflow run operates on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceTarget {
    /// Instance name as known to the provider.
    pub name: String,
    /// Cloud project that owns the instance.
    pub project_id: String,
    /// Zone hosting the instance (for example `us-west2-b`).
    pub zone: String,
}

impl InstanceTarget {
    /// Creates a target, trimming whitespace from every field.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] naming the first empty field.
    pub fn new(
        name: impl Into<String>,
        project_id: impl Into<String>,
        zone: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let target = Self {
            name: name.into().trim().to_owned(),
            project_id: project_id.into().trim().to_owned(),
            zone: zone.into().trim().to_owned(),
        };
        for (field, value) in [
            ("instance", &target.name),
            ("project_id", &target.project_id),
            ("zone", &target.zone),
        ] {
            if value.is_empty() {
                return Err(BackendError::Validation(field.to_owned()));
            }
        }
        Ok(target)
    }
}

impl fmt::Display for InstanceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.name, self.project_id, self.zone)
    }
}

/// Lifecycle state reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Booted and accepting work.
    Running,
    /// Shut down by the user; can be started.
    Stopped,
    /// Powered off by the provider or the user; can be started.
    Terminated,
    /// On its way up (`PROVISIONING`, `STAGING`, `REPAIRING`); no start needed.
    Starting,
    /// Anything else, carrying the raw provider status.
    Unknown(String),
}

impl InstanceState {
    /// Maps a provider status string onto a state. Matching ignores case and
    /// surrounding whitespace.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        let normalised = status.trim().to_ascii_uppercase();
        match normalised.as_str() {
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            "TERMINATED" => Self::Terminated,
            "PROVISIONING" | "STAGING" | "REPAIRING" => Self::Starting,
            _ => Self::Unknown(normalised),
        }
    }

    /// Returns `true` when a start command would bring the instance up.
    #[must_use]
    pub const fn is_startable(&self) -> bool {
        matches!(self, Self::Stopped | Self::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("RUNNING"),
            Self::Stopped => f.write_str("STOPPED"),
            Self::Terminated => f.write_str("TERMINATED"),
            Self::Starting => f.write_str("STARTING"),
            Self::Unknown(raw) if raw.is_empty() => f.write_str("UNKNOWN"),
            Self::Unknown(raw) => write!(f, "UNKNOWN ({raw})"),
        }
    }
}

/// Errors raised by backend-independent validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a target is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal cloud control surface the availability checker needs.
pub trait InstanceBackend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Queries the current lifecycle state of `target`.
    fn describe<'a>(
        &'a self,
        target: &'a InstanceTarget,
    ) -> BackendFuture<'a, InstanceState, Self::Error>;

    /// Asks the provider to start `target`. Returns once the request has been
    /// accepted; callers poll [`InstanceBackend::describe`] for the
    /// transition.
    fn start<'a>(&'a self, target: &'a InstanceTarget) -> BackendFuture<'a, (), Self::Error>;

    /// Returns `true` when `err` reflects an unanswered request (deadline
    /// expiry) rather than a rejection by the provider.
    fn is_transient(err: &Self::Error) -> bool;
}
