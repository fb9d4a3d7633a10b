//! Configuration loading via `ortho-config`.
//!
//! [`LauncherConfig`] merges defaults, the `code-remote.toml` configuration
//! file and `CODE_REMOTE_*` environment variables. Command-line flags are
//! layered on top by [`WorkflowConfigBuilder`], which produces the immutable
//! [`WorkflowConfig`] the workflow runs against.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::gcloud::DEFAULT_GCLOUD_BIN;
use crate::launcher::DEFAULT_EDITOR_BIN;
use crate::remote::DEFAULT_SSH_BIN;

mod workflow;

pub use workflow::{ConfigOverrides, WorkflowConfig, WorkflowConfigBuilder, WorkflowTimings};

/// Instance used when none is given on the command line.
pub const DEFAULT_INSTANCE: &str = "default-instance";
/// Cloud project used when none is configured.
pub const DEFAULT_PROJECT_ID: &str = "software-265220";
/// Zone used when none is configured.
pub const DEFAULT_ZONE: &str = "us-west2-b";
/// Directory on the instance that holds project checkouts.
pub const DEFAULT_REMOTE_HOME: &str = "/data/manas/";
/// Prefix the clone URL is built from.
pub const DEFAULT_REPO_ORIGIN: &str = "git@github.com:recogni";

/// File name searched for by configuration discovery.
pub const CONFIG_FILE_NAME: &str = "code-remote.toml";

/// Launcher settings layered from defaults, configuration files and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CODE_REMOTE",
    discovery(
        app_name = "code-remote",
        env_var = "CODE_REMOTE_CONFIG_PATH",
        config_file_name = "code-remote.toml",
        dotfile_name = ".code-remote.toml",
        project_file_name = "code-remote.toml"
    )
)]
pub struct LauncherConfig {
    /// Instance name used when the command line does not name one.
    #[ortho_config(default = DEFAULT_INSTANCE.to_owned())]
    pub instance: String,
    /// Cloud project that owns the instance.
    #[ortho_config(default = DEFAULT_PROJECT_ID.to_owned())]
    pub project_id: String,
    /// Zone hosting the instance.
    #[ortho_config(default = DEFAULT_ZONE.to_owned())]
    pub zone: String,
    /// Directory on the instance holding project checkouts.
    #[ortho_config(default = DEFAULT_REMOTE_HOME.to_owned())]
    pub remote_home: String,
    /// Repository origin prefix, for example `git@github.com:acme`.
    #[ortho_config(default = DEFAULT_REPO_ORIGIN.to_owned())]
    pub repo_origin: String,
    /// Do not forward the local SSH agent to clones and the editor session.
    #[ortho_config(default = false)]
    pub no_ssh_forwarding: bool,
    /// Fail instead of cloning when the repository is absent on the instance.
    #[ortho_config(default = false)]
    pub no_auto_clone: bool,
    /// Remote transport, `gcloud` or `ssh`.
    #[ortho_config(default = String::from("gcloud"))]
    pub transport: String,
    /// SSH host alias for the editor and the `ssh` transport.
    pub ssh_host: Option<String>,
    /// `gcloud` executable.
    #[ortho_config(default = DEFAULT_GCLOUD_BIN.to_owned())]
    pub gcloud_bin: String,
    /// `ssh` executable.
    #[ortho_config(default = DEFAULT_SSH_BIN.to_owned())]
    pub ssh_bin: String,
    /// Editor command-line launcher.
    #[ortho_config(default = DEFAULT_EDITOR_BIN.to_owned())]
    pub editor_bin: String,
    /// Deadline for instance state queries and repository queries.
    #[ortho_config(default = 30)]
    pub command_timeout_secs: u64,
    /// Deadline for a start request.
    #[ortho_config(default = 120)]
    pub start_timeout_secs: u64,
    /// Delay before retrying a start request that went unanswered.
    #[ortho_config(default = 15)]
    pub start_retry_backoff_secs: u64,
    /// Delay between state polls after a start.
    #[ortho_config(default = 10)]
    pub poll_interval_secs: u64,
    /// How long to wait for a started instance to report running.
    #[ortho_config(default = 300)]
    pub ready_timeout_secs: u64,
    /// Deadline for each SSH probe.
    #[ortho_config(default = 20)]
    pub ssh_timeout_secs: u64,
    /// Maximum number of SSH probes.
    #[ortho_config(default = 6)]
    pub connect_attempts: u32,
    /// Delay between SSH probes.
    #[ortho_config(default = 10)]
    pub connect_retry_delay_secs: u64,
    /// Deadline for the agent forwarding check.
    #[ortho_config(default = 15)]
    pub forwarding_timeout_secs: u64,
    /// Deadline for `git clone`.
    #[ortho_config(default = 600)]
    pub clone_timeout_secs: u64,
    /// How long the editor process is watched for an immediate failure.
    #[ortho_config(default = 2000)]
    pub launch_grace_millis: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn zero(&self) -> ConfigError {
        ConfigError::InvalidValue(format!(
            "{} must be greater than zero: check {} or {} in {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl LauncherConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("code-remote")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// and [`ConfigError::InvalidValue`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, metadata) in [
            (
                &self.instance,
                FieldMetadata::new("instance name", "CODE_REMOTE_INSTANCE", "instance"),
            ),
            (
                &self.project_id,
                FieldMetadata::new("cloud project id", "CODE_REMOTE_PROJECT_ID", "project_id"),
            ),
            (
                &self.zone,
                FieldMetadata::new("zone", "CODE_REMOTE_ZONE", "zone"),
            ),
            (
                &self.remote_home,
                FieldMetadata::new("remote home directory", "CODE_REMOTE_REMOTE_HOME", "remote_home"),
            ),
            (
                &self.repo_origin,
                FieldMetadata::new("repository origin prefix", "CODE_REMOTE_REPO_ORIGIN", "repo_origin"),
            ),
            (
                &self.gcloud_bin,
                FieldMetadata::new("gcloud executable", "CODE_REMOTE_GCLOUD_BIN", "gcloud_bin"),
            ),
            (
                &self.ssh_bin,
                FieldMetadata::new("ssh executable", "CODE_REMOTE_SSH_BIN", "ssh_bin"),
            ),
            (
                &self.editor_bin,
                FieldMetadata::new("editor executable", "CODE_REMOTE_EDITOR_BIN", "editor_bin"),
            ),
        ] {
            if value.trim().is_empty() {
                return Err(metadata.missing());
            }
        }

        for (value, metadata) in [
            (
                self.command_timeout_secs,
                FieldMetadata::new(
                    "command timeout",
                    "CODE_REMOTE_COMMAND_TIMEOUT_SECS",
                    "command_timeout_secs",
                ),
            ),
            (
                self.start_timeout_secs,
                FieldMetadata::new(
                    "start timeout",
                    "CODE_REMOTE_START_TIMEOUT_SECS",
                    "start_timeout_secs",
                ),
            ),
            (
                self.ready_timeout_secs,
                FieldMetadata::new(
                    "ready timeout",
                    "CODE_REMOTE_READY_TIMEOUT_SECS",
                    "ready_timeout_secs",
                ),
            ),
            (
                self.ssh_timeout_secs,
                FieldMetadata::new("SSH timeout", "CODE_REMOTE_SSH_TIMEOUT_SECS", "ssh_timeout_secs"),
            ),
            (
                u64::from(self.connect_attempts),
                FieldMetadata::new(
                    "connection attempt count",
                    "CODE_REMOTE_CONNECT_ATTEMPTS",
                    "connect_attempts",
                ),
            ),
            (
                self.forwarding_timeout_secs,
                FieldMetadata::new(
                    "forwarding check timeout",
                    "CODE_REMOTE_FORWARDING_TIMEOUT_SECS",
                    "forwarding_timeout_secs",
                ),
            ),
            (
                self.clone_timeout_secs,
                FieldMetadata::new(
                    "clone timeout",
                    "CODE_REMOTE_CLONE_TIMEOUT_SECS",
                    "clone_timeout_secs",
                ),
            ),
        ] {
            if value == 0 {
                return Err(metadata.zero());
            }
        }

        self.transport
            .parse::<crate::remote::Transport>()
            .map_err(|message| {
                ConfigError::InvalidValue(format!(
                    "{message}: check CODE_REMOTE_TRANSPORT or transport in {CONFIG_FILE_NAME}"
                ))
            })?;
        Ok(())
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            instance: DEFAULT_INSTANCE.to_owned(),
            project_id: DEFAULT_PROJECT_ID.to_owned(),
            zone: DEFAULT_ZONE.to_owned(),
            remote_home: DEFAULT_REMOTE_HOME.to_owned(),
            repo_origin: DEFAULT_REPO_ORIGIN.to_owned(),
            no_ssh_forwarding: false,
            no_auto_clone: false,
            transport: String::from("gcloud"),
            ssh_host: None,
            gcloud_bin: DEFAULT_GCLOUD_BIN.to_owned(),
            ssh_bin: DEFAULT_SSH_BIN.to_owned(),
            editor_bin: DEFAULT_EDITOR_BIN.to_owned(),
            command_timeout_secs: 30,
            start_timeout_secs: 120,
            start_retry_backoff_secs: 15,
            poll_interval_secs: 10,
            ready_timeout_secs: 300,
            ssh_timeout_secs: 20,
            connect_attempts: 6,
            connect_retry_delay_secs: 10,
            forwarding_timeout_secs: 15,
            clone_timeout_secs: 600,
            launch_grace_millis: 2000,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range or malformed.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Raised when the project folder has no usable directory name.
    #[error("cannot derive a directory name from project folder '{folder}': {reason}")]
    ProjectFolder {
        /// Folder as given on the command line.
        folder: String,
        /// What went wrong.
        reason: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

