//! Google Compute Engine backend driven through the `gcloud` CLI.
//!
//! State queries use `gcloud compute instances describe --format=json` and
//! parse the `status` field; starts use `gcloud compute instances start`.
//! Both calls go through a [`CommandRunner`] with explicit deadlines.

use std::ffi::OsString;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::backend::{BackendFuture, InstanceBackend, InstanceState, InstanceTarget};
use crate::process::{CommandOutput, CommandRunner, ProcessCommandRunner};

mod error;

pub use error::GcloudError;

/// Default `gcloud` binary name.
pub const DEFAULT_GCLOUD_BIN: &str = "gcloud";

/// Settings for [`GcloudBackend`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GcloudSettings {
    /// Path to the `gcloud` executable.
    pub gcloud_bin: String,
    /// Deadline for state queries.
    pub describe_timeout: Duration,
    /// Deadline for a start request.
    pub start_timeout: Duration,
}

/// Instance backend shelling out to `gcloud compute instances`.
#[derive(Clone, Debug)]
pub struct GcloudBackend<R: CommandRunner> {
    settings: GcloudSettings,
    runner: R,
}

impl GcloudBackend<ProcessCommandRunner> {
    /// Creates a backend wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner(settings: GcloudSettings) -> Self {
        Self::new(settings, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> GcloudBackend<R> {
    /// Creates a backend using the provided runner.
    #[must_use]
    pub const fn new(settings: GcloudSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    fn describe_args(target: &InstanceTarget) -> Vec<OsString> {
        let mut args = instance_args("describe", target);
        args.push(OsString::from("--format=json"));
        args
    }

    fn start_args(target: &InstanceTarget) -> Vec<OsString> {
        let mut args = instance_args("start", target);
        args.push(OsString::from("--quiet"));
        args
    }

    fn run_gcloud(
        &self,
        args: &[OsString],
        timeout: Duration,
        action: &str,
    ) -> Result<CommandOutput, GcloudError> {
        let output = self.runner.run(&self.settings.gcloud_bin, args, timeout)?;
        if output.is_success() {
            return Ok(output);
        }

        Err(GcloudError::CommandFailure {
            program: self.settings.gcloud_bin.clone(),
            action: action.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    fn describe_blocking(&self, target: &InstanceTarget) -> Result<InstanceState, GcloudError> {
        let output = self.run_gcloud(
            &Self::describe_args(target),
            self.settings.describe_timeout,
            "describe",
        )?;
        let described: DescribedInstance =
            serde_json::from_str(&output.stdout).map_err(|err| GcloudError::Parse {
                instance: target.name.clone(),
                message: err.to_string(),
            })?;
        debug!(instance = %target.name, status = %described.status, "described instance");
        Ok(InstanceState::from_status(&described.status))
    }

    fn start_blocking(&self, target: &InstanceTarget) -> Result<(), GcloudError> {
        self.run_gcloud(
            &Self::start_args(target),
            self.settings.start_timeout,
            "start",
        )
        .map(|_| ())
    }
}

impl<R: CommandRunner> InstanceBackend for GcloudBackend<R> {
    type Error = GcloudError;

    fn describe<'a>(
        &'a self,
        target: &'a InstanceTarget,
    ) -> BackendFuture<'a, InstanceState, Self::Error> {
        Box::pin(async move { self.describe_blocking(target) })
    }

    fn start<'a>(&'a self, target: &'a InstanceTarget) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.start_blocking(target) })
    }

    fn is_transient(err: &Self::Error) -> bool {
        matches!(err, GcloudError::Runner(runner) if runner.is_timeout())
    }
}

/// Arguments shared by every `gcloud compute instances <verb>` call.
fn instance_args(verb: &str, target: &InstanceTarget) -> Vec<OsString> {
    vec![
        OsString::from("compute"),
        OsString::from("instances"),
        OsString::from(verb),
        OsString::from(&target.name),
        OsString::from(format!("--project={}", target.project_id)),
        OsString::from(format!("--zone={}", target.zone)),
    ]
}

#[derive(Debug, Deserialize)]
struct DescribedInstance {
    #[serde(default)]
    status: String,
}
