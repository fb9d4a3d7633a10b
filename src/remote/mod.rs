//! Remote command execution over SSH.
//!
//! [`RemoteShell`] is the narrow channel the connectivity verifier and the
//! repository provisioner talk through. Two transports implement it:
//! [`GcloudShell`] tunnels through `gcloud compute ssh`, which manages keys
//! and host resolution itself, and [`SshShell`] uses the system `ssh` client
//! against a host alias from the user's SSH config. Remote exit codes are
//! preserved; only transport failures (spawn errors, deadlines) are errors.

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::backend::InstanceTarget;
use crate::process::{CommandRunner, ProcessCommandRunner, RunnerError};

/// Default `ssh` binary name.
pub const DEFAULT_SSH_BIN: &str = "ssh";

/// A single remote command with its deadline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommand {
    /// Shell text executed by the remote login shell.
    pub script: String,
    /// Deadline for the whole round trip, connection included.
    pub timeout: Duration,
    /// Whether the local SSH agent is forwarded for this command.
    pub forward_agent: bool,
}

impl RemoteCommand {
    /// Creates a command without agent forwarding.
    #[must_use]
    pub fn new(script: impl Into<String>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            timeout,
            forward_agent: false,
        }
    }

    /// Sets whether the local SSH agent is forwarded.
    #[must_use]
    pub const fn forward_agent(mut self, enabled: bool) -> Self {
        self.forward_agent = enabled;
        self
    }
}

/// Output captured from a remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote process (or by `ssh` on connection
    /// failure), if any.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Trimmed stderr, or a status description when stderr is empty.
    #[must_use]
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        match self.exit_code {
            Some(code) if stderr.is_empty() => format!("exited with status {code}"),
            Some(code) => format!("exited with status {code}: {stderr}"),
            None if stderr.is_empty() => String::from("terminated without an exit status"),
            None => format!("terminated without an exit status: {stderr}"),
        }
    }
}

/// Errors raised when a remote command could not be carried out at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when the local transport process fails or overruns.
    #[error("remote transport failed: {0}")]
    Transport(#[from] RunnerError),
}

/// Narrow channel for executing commands on the remote instance.
pub trait RemoteShell {
    /// Runs `command` on the remote host and returns its output. Non-zero
    /// remote exits are returned as output, not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the transport cannot be started or the
    /// deadline expires.
    fn run(&self, command: &RemoteCommand) -> Result<RemoteCommandOutput, RemoteError>;

    /// Host name the editor should use to reach the same machine.
    fn editor_host(&self) -> &str;
}

/// Supported transports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Transport {
    /// `gcloud compute ssh`.
    #[default]
    Gcloud,
    /// The system `ssh` client and a configured host alias.
    Ssh,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gcloud" => Ok(Self::Gcloud),
            "ssh" => Ok(Self::Ssh),
            other => Err(format!("unknown transport '{other}' (expected gcloud or ssh)")),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcloud => f.write_str("gcloud"),
            Self::Ssh => f.write_str("ssh"),
        }
    }
}

/// Shell-quotes a single word for the remote POSIX shell.
#[must_use]
pub fn quote(value: &str) -> Cow<'_, str> {
    escape(value.into())
}

/// Remote shell tunnelled through `gcloud compute ssh`.
#[derive(Clone, Debug)]
pub struct GcloudShell<R: CommandRunner> {
    gcloud_bin: String,
    target: InstanceTarget,
    editor_host: String,
    runner: R,
}

impl GcloudShell<ProcessCommandRunner> {
    /// Creates a shell wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(
        gcloud_bin: impl Into<String>,
        target: InstanceTarget,
        editor_host: Option<String>,
    ) -> Self {
        Self::new(gcloud_bin, target, editor_host, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> GcloudShell<R> {
    /// Creates a shell for `target`. The editor host defaults to the instance
    /// name.
    #[must_use]
    pub fn new(
        gcloud_bin: impl Into<String>,
        target: InstanceTarget,
        editor_host: Option<String>,
        runner: R,
    ) -> Self {
        let editor_host = editor_host.unwrap_or_else(|| target.name.clone());
        Self {
            gcloud_bin: gcloud_bin.into(),
            target,
            editor_host,
            runner,
        }
    }

    fn build_args(&self, command: &RemoteCommand) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("compute"),
            OsString::from("ssh"),
            OsString::from(&self.target.name),
            OsString::from(format!("--project={}", self.target.project_id)),
            OsString::from(format!("--zone={}", self.target.zone)),
            OsString::from(format!("--command={}", command.script)),
            OsString::from("--quiet"),
            OsString::from("--"),
        ];
        args.extend(ssh_options(command));
        args
    }
}

impl<R: CommandRunner> RemoteShell for GcloudShell<R> {
    fn run(&self, command: &RemoteCommand) -> Result<RemoteCommandOutput, RemoteError> {
        debug!(instance = %self.target.name, script = %command.script, "running remote command");
        let args = self.build_args(command);
        let output = self.runner.run(&self.gcloud_bin, &args, command.timeout)?;
        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn editor_host(&self) -> &str {
        &self.editor_host
    }
}

/// Remote shell using the system `ssh` client and a host alias.
#[derive(Clone, Debug)]
pub struct SshShell<R: CommandRunner> {
    ssh_bin: String,
    host: String,
    runner: R,
}

impl SshShell<ProcessCommandRunner> {
    /// Creates a shell wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(ssh_bin: impl Into<String>, host: impl Into<String>) -> Self {
        Self::new(ssh_bin, host, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshShell<R> {
    /// Creates a shell connecting to `host`.
    #[must_use]
    pub fn new(ssh_bin: impl Into<String>, host: impl Into<String>, runner: R) -> Self {
        Self {
            ssh_bin: ssh_bin.into(),
            host: host.into(),
            runner,
        }
    }

    fn build_args(&self, command: &RemoteCommand) -> Vec<OsString> {
        let mut args = ssh_options(command);
        args.push(OsString::from(&self.host));
        args.push(OsString::from(&command.script));
        args
    }
}

impl<R: CommandRunner> RemoteShell for SshShell<R> {
    fn run(&self, command: &RemoteCommand) -> Result<RemoteCommandOutput, RemoteError> {
        debug!(host = %self.host, script = %command.script, "running remote command");
        let args = self.build_args(command);
        let output = self.runner.run(&self.ssh_bin, &args, command.timeout)?;
        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn editor_host(&self) -> &str {
        &self.host
    }
}

/// Options handed to the underlying `ssh` client by both transports.
fn ssh_options(command: &RemoteCommand) -> Vec<OsString> {
    let connect_secs = command.timeout.as_secs().max(1);
    let mut args = vec![
        OsString::from("-o"),
        OsString::from("BatchMode=yes"),
        OsString::from("-o"),
        OsString::from(format!("ConnectTimeout={connect_secs}")),
    ];
    if command.forward_agent {
        args.push(OsString::from("-A"));
    }
    args
}
