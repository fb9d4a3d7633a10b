//! The immutable record one workflow run is driven by.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use super::{ConfigError, LauncherConfig};
use crate::availability::AvailabilitySettings;
use crate::backend::InstanceTarget;
use crate::connectivity::ConnectivitySettings;
use crate::gcloud::GcloudSettings;
use crate::remote::Transport;
use crate::repository::{RepositoryLayout, RepositorySettings};

/// Deadlines and delays for every external call the workflow makes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkflowTimings {
    /// Instance state and repository queries.
    pub command_timeout: Duration,
    /// Start requests.
    pub start_timeout: Duration,
    /// Delay before retrying an unanswered start.
    pub start_retry_backoff: Duration,
    /// Delay between state polls.
    pub poll_interval: Duration,
    /// Readiness deadline after a start.
    pub ready_timeout: Duration,
    /// Per-probe SSH deadline.
    pub ssh_timeout: Duration,
    /// Maximum SSH probes.
    pub connect_attempts: u32,
    /// Delay between SSH probes.
    pub connect_retry_delay: Duration,
    /// Agent forwarding check deadline.
    pub forwarding_timeout: Duration,
    /// Clone deadline.
    pub clone_timeout: Duration,
    /// Window in which an editor exit counts as a failed launch.
    pub launch_grace: Duration,
}

impl WorkflowTimings {
    fn from_config(config: &LauncherConfig) -> Self {
        Self {
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            start_timeout: Duration::from_secs(config.start_timeout_secs),
            start_retry_backoff: Duration::from_secs(config.start_retry_backoff_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            ssh_timeout: Duration::from_secs(config.ssh_timeout_secs),
            connect_attempts: config.connect_attempts,
            connect_retry_delay: Duration::from_secs(config.connect_retry_delay_secs),
            forwarding_timeout: Duration::from_secs(config.forwarding_timeout_secs),
            clone_timeout: Duration::from_secs(config.clone_timeout_secs),
            launch_grace: Duration::from_millis(config.launch_grace_millis),
        }
    }
}

/// Values given on the command line. `None` and `false` leave the
/// configured value alone.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigOverrides {
    /// Instance name.
    pub instance: Option<String>,
    /// Cloud project id.
    pub project_id: Option<String>,
    /// Zone.
    pub zone: Option<String>,
    /// Remote home directory.
    pub remote_home: Option<String>,
    /// Repository origin prefix.
    pub repo_origin: Option<String>,
    /// Remote transport name.
    pub transport: Option<String>,
    /// SSH host alias.
    pub ssh_host: Option<String>,
    /// Editor executable.
    pub editor_bin: Option<String>,
    /// Disables agent forwarding.
    pub no_ssh_forwarding: bool,
    /// Disables automatic cloning.
    pub no_auto_clone: bool,
    /// Stops after the forwarding check.
    pub test_ssh_forwarding: bool,
}

/// Immutable configuration for one workflow run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkflowConfig {
    project_folder: Utf8PathBuf,
    folder_name: String,
    target: InstanceTarget,
    remote_home: String,
    repo_origin: String,
    ssh_forwarding: bool,
    auto_clone: bool,
    test_forwarding: bool,
    transport: Transport,
    ssh_host: Option<String>,
    gcloud_bin: String,
    ssh_bin: String,
    editor_bin: String,
    timings: WorkflowTimings,
}

impl WorkflowConfig {
    /// Starts building a configuration on top of `base`.
    #[must_use]
    pub fn builder(base: LauncherConfig) -> WorkflowConfigBuilder {
        WorkflowConfigBuilder::new(base)
    }

    /// Local project folder as given.
    #[must_use]
    pub fn project_folder(&self) -> &Utf8Path {
        &self.project_folder
    }

    /// Directory name used on the instance and in the clone URL.
    #[must_use]
    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// Instance the run operates on.
    #[must_use]
    pub const fn target(&self) -> &InstanceTarget {
        &self.target
    }

    /// Remote home directory.
    #[must_use]
    pub fn remote_home(&self) -> &str {
        &self.remote_home
    }

    /// Repository origin prefix.
    #[must_use]
    pub fn repo_origin(&self) -> &str {
        &self.repo_origin
    }

    /// Whether the SSH agent is forwarded.
    #[must_use]
    pub const fn ssh_forwarding(&self) -> bool {
        self.ssh_forwarding
    }

    /// Whether absent repositories are cloned.
    #[must_use]
    pub const fn auto_clone(&self) -> bool {
        self.auto_clone
    }

    /// Whether the run stops after the forwarding check.
    #[must_use]
    pub const fn test_forwarding(&self) -> bool {
        self.test_forwarding
    }

    /// Remote transport.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// SSH host alias, if configured.
    #[must_use]
    pub fn ssh_host(&self) -> Option<&str> {
        self.ssh_host.as_deref()
    }

    /// `gcloud` executable.
    #[must_use]
    pub fn gcloud_bin(&self) -> &str {
        &self.gcloud_bin
    }

    /// `ssh` executable.
    #[must_use]
    pub fn ssh_bin(&self) -> &str {
        &self.ssh_bin
    }

    /// Editor executable.
    #[must_use]
    pub fn editor_bin(&self) -> &str {
        &self.editor_bin
    }

    /// Timing policy.
    #[must_use]
    pub const fn timings(&self) -> &WorkflowTimings {
        &self.timings
    }

    /// Remote path and clone URL of the project.
    #[must_use]
    pub fn layout(&self) -> RepositoryLayout {
        RepositoryLayout::new(&self.repo_origin, &self.folder_name, &self.remote_home)
    }

    /// Settings for the `gcloud` instance backend.
    #[must_use]
    pub fn gcloud_settings(&self) -> GcloudSettings {
        GcloudSettings {
            gcloud_bin: self.gcloud_bin.clone(),
            describe_timeout: self.timings.command_timeout,
            start_timeout: self.timings.start_timeout,
        }
    }

    /// Settings for the availability checker.
    #[must_use]
    pub const fn availability_settings(&self) -> AvailabilitySettings {
        AvailabilitySettings {
            poll_interval: self.timings.poll_interval,
            ready_timeout: self.timings.ready_timeout,
            start_retry_backoff: self.timings.start_retry_backoff,
        }
    }

    /// Settings for the connectivity verifier.
    #[must_use]
    pub const fn connectivity_settings(&self) -> ConnectivitySettings {
        ConnectivitySettings {
            attempts: self.timings.connect_attempts,
            retry_delay: self.timings.connect_retry_delay,
            probe_timeout: self.timings.ssh_timeout,
            forwarding_timeout: self.timings.forwarding_timeout,
        }
    }

    /// Settings for the repository provisioner.
    #[must_use]
    pub const fn repository_settings(&self) -> RepositorySettings {
        RepositorySettings {
            auto_clone: self.auto_clone,
            forward_agent: self.ssh_forwarding,
            query_timeout: self.timings.command_timeout,
            clone_timeout: self.timings.clone_timeout,
        }
    }
}

/// Layers command-line overrides onto [`LauncherConfig`].
#[derive(Clone, Debug)]
pub struct WorkflowConfigBuilder {
    base: LauncherConfig,
    project_folder: Option<String>,
    overrides: ConfigOverrides,
}

impl WorkflowConfigBuilder {
    /// Creates a builder on top of `base`.
    #[must_use]
    pub fn new(base: LauncherConfig) -> Self {
        Self {
            base,
            project_folder: None,
            overrides: ConfigOverrides::default(),
        }
    }

    /// Sets the local project folder.
    #[must_use]
    pub fn project_folder(mut self, folder: impl Into<String>) -> Self {
        self.project_folder = Some(folder.into());
        self
    }

    /// Applies command-line overrides.
    #[must_use]
    pub fn overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Validates the merged values and produces the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a value is missing or invalid, or the
    /// project folder has no usable name.
    pub fn build(self) -> Result<WorkflowConfig, ConfigError> {
        let Self {
            base,
            project_folder,
            overrides,
        } = self;
        let merged = merge(base, &overrides);
        merged.validate()?;

        let folder = project_folder.ok_or_else(|| {
            ConfigError::MissingField(String::from("missing project folder argument"))
        })?;
        let folder_name = derive_folder_name(&folder)?;

        let ssh_forwarding = !(merged.no_ssh_forwarding || overrides.no_ssh_forwarding);
        if overrides.test_ssh_forwarding && !ssh_forwarding {
            return Err(ConfigError::InvalidValue(String::from(
                "--test-ssh-forwarding needs SSH forwarding; unset CODE_REMOTE_NO_SSH_FORWARDING or no_ssh_forwarding",
            )));
        }

        let target = InstanceTarget::new(&merged.instance, &merged.project_id, &merged.zone)
            .map_err(|err| ConfigError::MissingField(err.to_string()))?;
        let transport = merged
            .transport
            .parse::<Transport>()
            .map_err(ConfigError::InvalidValue)?;
        let ssh_host = merged
            .ssh_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_owned);
        let timings = WorkflowTimings::from_config(&merged);

        Ok(WorkflowConfig {
            project_folder: Utf8PathBuf::from(folder),
            folder_name,
            target,
            remote_home: merged.remote_home.trim().to_owned(),
            repo_origin: merged.repo_origin.trim().to_owned(),
            ssh_forwarding,
            auto_clone: !(merged.no_auto_clone || overrides.no_auto_clone),
            test_forwarding: overrides.test_ssh_forwarding,
            transport,
            ssh_host,
            gcloud_bin: merged.gcloud_bin,
            ssh_bin: merged.ssh_bin,
            editor_bin: merged.editor_bin,
            timings,
        })
    }
}

fn merge(base: LauncherConfig, overrides: &ConfigOverrides) -> LauncherConfig {
    let pick = |value: &Option<String>, fallback: String| value.clone().unwrap_or(fallback);
    LauncherConfig {
        instance: pick(&overrides.instance, base.instance),
        project_id: pick(&overrides.project_id, base.project_id),
        zone: pick(&overrides.zone, base.zone),
        remote_home: pick(&overrides.remote_home, base.remote_home),
        repo_origin: pick(&overrides.repo_origin, base.repo_origin),
        transport: pick(&overrides.transport, base.transport),
        ssh_host: overrides.ssh_host.clone().or(base.ssh_host),
        editor_bin: pick(&overrides.editor_bin, base.editor_bin),
        ..base
    }
}

/// Returns the last path component of `folder`. `.` and `..` (or paths
/// ending in them) are resolved against the current directory first.
fn derive_folder_name(folder: &str) -> Result<String, ConfigError> {
    let error = |reason: String| ConfigError::ProjectFolder {
        folder: folder.to_owned(),
        reason,
    };

    let path = Utf8Path::new(folder.trim());
    if path.as_str().is_empty() {
        return Err(error(String::from("the folder is empty")));
    }

    path.file_name().map_or_else(
        || {
            let resolved = path
                .canonicalize_utf8()
                .map_err(|err| error(err.to_string()))?;
            resolved
                .file_name()
                .map(str::to_owned)
                .ok_or_else(|| error(String::from("it resolves to the filesystem root")))
        },
        |name| Ok(name.to_owned()),
    )
}
