//! Opens the local editor on the remote project.

use std::ffi::OsString;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::process::{CommandRunner, RunnerError, SpawnOutcome};

/// Default editor CLI.
pub const DEFAULT_EDITOR_BIN: &str = "code";

/// Errors raised while launching the editor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LaunchError {
    /// Raised when the editor CLI cannot be started.
    #[error("failed to start editor '{editor}'; install its command-line launcher or pass --editor")]
    Spawn {
        /// Editor binary.
        editor: String,
        /// Underlying runner failure.
        #[source]
        source: RunnerError,
    },
    /// Raised when the editor exits with a failure inside the grace window.
    #[error("editor '{editor}' exited with status {status}")]
    Exited {
        /// Editor binary.
        editor: String,
        /// Exit status text.
        status: String,
    },
}

/// Outcome of a successful launch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchReport {
    /// Folder URI handed to the editor.
    pub uri: String,
    /// Steps for checking agent forwarding from the remote terminal, present
    /// only when forwarding is enabled.
    pub instructions: Option<Vec<String>>,
}

/// Builds the editor's remote folder URI. Each path segment is
/// percent-encoded, so spaces and reserved characters survive.
///
/// ```
/// use code_remote::launcher::folder_uri;
///
/// assert_eq!(
///     folder_uri("dev-box", "/data/dev/widgets"),
///     "vscode-remote://ssh-remote+dev-box/data/dev/widgets"
/// );
/// assert_eq!(
///     folder_uri("dev-box", "/data/dev/my widgets"),
///     "vscode-remote://ssh-remote+dev-box/data/dev/my%20widgets"
/// );
/// ```
#[must_use]
pub fn folder_uri(host: &str, remote_path: &str) -> String {
    let path = remote_path
        .trim_start_matches('/')
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/");
    format!("vscode-remote://ssh-remote+{host}/{path}")
}

/// Steps for confirming that keys reach the remote machine.
#[must_use]
pub fn forwarding_instructions() -> Vec<String> {
    vec![
        String::from("Open a terminal in the editor's remote window."),
        String::from("Run: ssh-add -l"),
        String::from("Your local SSH keys should be listed."),
        String::from(
            "'Could not open a connection to your authentication agent' or 'The agent has no identities' means forwarding is not working.",
        ),
    ]
}

/// Launches the editor's remote session without waiting for it.
#[derive(Clone, Debug)]
pub struct SessionLauncher<R: CommandRunner> {
    runner: R,
    editor_bin: String,
    grace: Duration,
    forwarding: bool,
}

impl<R: CommandRunner> SessionLauncher<R> {
    /// Creates a launcher. `grace` is how long the editor process is watched
    /// for an immediate failure.
    #[must_use]
    pub fn new(runner: R, editor_bin: impl Into<String>, grace: Duration, forwarding: bool) -> Self {
        Self {
            runner,
            editor_bin: editor_bin.into(),
            grace,
            forwarding,
        }
    }

    /// Opens `remote_path` on `host` in the editor.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the editor cannot be started or exits
    /// with a failure status inside the grace window.
    pub fn launch(&self, host: &str, remote_path: &str) -> Result<LaunchReport, LaunchError> {
        let uri = folder_uri(host, remote_path);
        info!(editor = %self.editor_bin, %uri, "launching editor");

        let args = [OsString::from("--folder-uri"), OsString::from(&uri)];
        let outcome = self
            .runner
            .spawn_detached(&self.editor_bin, &args, self.grace)
            .map_err(|source| LaunchError::Spawn {
                editor: self.editor_bin.clone(),
                source,
            })?;

        if !outcome.is_success() {
            let status = match outcome {
                SpawnOutcome::Exited { code: Some(code) } => code.to_string(),
                _ => String::from("unknown"),
            };
            return Err(LaunchError::Exited {
                editor: self.editor_bin.clone(),
                status,
            });
        }

        Ok(LaunchReport {
            uri,
            instructions: self.forwarding.then(forwarding_instructions),
        })
    }
}
