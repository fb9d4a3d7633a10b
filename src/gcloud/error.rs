//! Error types for the `gcloud` backend.

use thiserror::Error;

use crate::process::RunnerError;

/// Errors raised by [`super::GcloudBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GcloudError {
    /// Raised when `gcloud` exits with a non-zero status.
    #[error("{program} {action} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed (typically `gcloud`).
        program: String,
        /// Instance verb being run (`describe`, `start`).
        action: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when the JSON description cannot be parsed.
    #[error("failed to parse description of instance {instance}: {message}")]
    Parse {
        /// Instance being described.
        instance: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when the process cannot be run or overruns its deadline.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}
