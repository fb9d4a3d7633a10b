//! Ensures the project repository exists on the instance.
//!
//! Presence is computed fresh on every run with a single remote query. An
//! absent repository is cloned when automatic cloning is enabled. Partial
//! checkouts left by an interrupted clone are reported and never removed.

mod layout;

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::remote::{RemoteCommand, RemoteError, RemoteShell, quote};

pub use layout::RepositoryLayout;

/// What the presence query found at the remote path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RepositoryPresence {
    /// Nothing exists at the path.
    Absent,
    /// A repository whose origin matches the expected clone URL (or which has
    /// no origin configured).
    Present,
    /// A repository whose origin points somewhere else.
    DivergentRemote {
        /// Origin URL configured in the remote checkout.
        actual: String,
    },
    /// A valid repository with no commits yet, as left by cloning an empty
    /// remote.
    Empty,
    /// The path exists but holds no `.git` directory.
    NotARepository,
    /// A `.git` directory exists but git does not accept it as a repository.
    Incomplete,
}

impl fmt::Display for RepositoryPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Present => f.write_str("present"),
            Self::DivergentRemote { actual } => write!(f, "present (origin {actual})"),
            Self::Empty => f.write_str("present (no commits yet)"),
            Self::NotARepository => f.write_str("not a git repository"),
            Self::Incomplete => f.write_str("incomplete checkout"),
        }
    }
}

/// Branch and working tree summary of the remote checkout.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RepositoryStatus {
    /// Current branch, `None` when detached or unknown.
    pub branch: Option<String>,
    /// Whether the working tree has uncommitted changes.
    pub dirty: bool,
    /// Configured origin URL, if any.
    pub origin: Option<String>,
}

impl fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let branch = self.branch.as_deref().unwrap_or("(detached)");
        let tree = if self.dirty { "dirty" } else { "clean" };
        write!(f, "branch {branch}, {tree}")?;
        match &self.origin {
            Some(origin) => write!(f, ", origin {origin}"),
            None => Ok(()),
        }
    }
}

/// Outcome of a successful provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepositoryReport {
    /// Presence observed before any action.
    pub presence: RepositoryPresence,
    /// Whether a clone was performed.
    pub cloned: bool,
    /// Checkout status, when it could be retrieved.
    pub status: Option<RepositoryStatus>,
    /// Non-fatal observations surfaced to the user.
    pub warnings: Vec<String>,
}

/// What a failed clone left behind at the target path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PartialCheckout {
    /// Nothing exists at the path.
    Nothing,
    /// A directory remains at the path. It is never removed automatically.
    Left,
    /// The follow-up presence query failed.
    Unknown {
        /// Why the path could not be checked.
        reason: String,
    },
}

impl fmt::Display for PartialCheckout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing => f.write_str("nothing was left at the path"),
            Self::Left => f.write_str(
                "a partial checkout remains at the path and was not removed; remove it before retrying",
            ),
            Self::Unknown { reason } => {
                write!(f, "could not check for a partial checkout: {reason}")
            }
        }
    }
}

/// Errors raised while provisioning the repository.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RepositoryError {
    /// Raised when nothing exists and cloning is disabled.
    #[error("no repository at {path} and automatic cloning is disabled; clone it manually or drop --no-auto-clone")]
    Missing {
        /// Expected remote path.
        path: String,
    },
    /// Raised when an interrupted checkout is found.
    #[error(
        "{path} holds an incomplete git checkout; repair it (git -C {path} fetch) or remove it, then rerun"
    )]
    Incomplete {
        /// Remote path of the partial checkout.
        path: String,
    },
    /// Raised when `git clone` fails.
    #[error("cloning {url} into {path} failed: {detail}; {leftover}")]
    CloneFailed {
        /// Clone URL.
        url: String,
        /// Target path.
        path: String,
        /// Failure reported by the remote side.
        detail: String,
        /// What the failed clone left at `path`.
        leftover: PartialCheckout,
    },
    /// Raised when the presence query output cannot be understood.
    #[error("unexpected repository query output: {detail}")]
    Query {
        /// Description of the problem.
        detail: String,
    },
    /// Raised when a remote command cannot be carried out.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Provisioning policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RepositorySettings {
    /// Whether an absent repository is cloned.
    pub auto_clone: bool,
    /// Whether the SSH agent is forwarded to the clone.
    pub forward_agent: bool,
    /// Deadline for the presence and status queries.
    pub query_timeout: Duration,
    /// Deadline for `git clone`.
    pub clone_timeout: Duration,
}

/// Checks for, and if needed clones, the project repository.
#[derive(Clone, Debug)]
pub struct RepositoryProvisioner {
    layout: RepositoryLayout,
    settings: RepositorySettings,
}

impl RepositoryProvisioner {
    /// Creates a provisioner.
    #[must_use]
    pub const fn new(layout: RepositoryLayout, settings: RepositorySettings) -> Self {
        Self { layout, settings }
    }

    /// Layout the provisioner works against.
    #[must_use]
    pub const fn layout(&self) -> &RepositoryLayout {
        &self.layout
    }

    /// Makes sure a usable checkout exists at the remote path.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the repository is missing and cannot
    /// be cloned, a partial checkout is found, or a remote query fails.
    pub fn provision<S: RemoteShell>(&self, shell: &S) -> Result<RepositoryReport, RepositoryError> {
        let path = self.layout.remote_path();
        let presence = self.presence(shell)?;
        info!(path, presence = %presence, "repository presence");

        let mut warnings = Vec::new();
        match &presence {
            RepositoryPresence::Absent if !self.settings.auto_clone => {
                return Err(RepositoryError::Missing {
                    path: path.to_owned(),
                });
            }
            RepositoryPresence::Absent => {
                self.clone_into(shell)?;
                let status = self.status_or_warn(shell, &mut warnings);
                return Ok(RepositoryReport {
                    presence,
                    cloned: true,
                    status,
                    warnings,
                });
            }
            RepositoryPresence::Incomplete => {
                return Err(RepositoryError::Incomplete {
                    path: path.to_owned(),
                });
            }
            RepositoryPresence::NotARepository => {
                warnings.push(format!("{path} exists but is not a git repository"));
            }
            RepositoryPresence::Empty => {
                warnings.push(format!("{path} is a repository with no commits yet"));
            }
            RepositoryPresence::DivergentRemote { actual } => {
                warnings.push(format!(
                    "{path} tracks {actual}, expected {}",
                    self.layout.clone_url()
                ));
            }
            RepositoryPresence::Present => {}
        }

        for warning in &warnings {
            warn!(%warning, "repository check");
        }

        let status = if presence == RepositoryPresence::NotARepository {
            None
        } else {
            self.status_or_warn(shell, &mut warnings)
        };

        Ok(RepositoryReport {
            presence,
            cloned: false,
            status,
            warnings,
        })
    }

    /// Runs the single presence query.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] when the output is not understood
    /// and [`RepositoryError::Remote`] when the transport fails.
    pub fn presence<S: RemoteShell>(&self, shell: &S) -> Result<RepositoryPresence, RepositoryError> {
        let command = RemoteCommand::new(
            presence_script(self.layout.remote_path()),
            self.settings.query_timeout,
        );
        let output = shell.run(&command)?;
        if !output.is_success() {
            return Err(RepositoryError::Query {
                detail: output.failure_detail(),
            });
        }
        parse_presence(&output.stdout, self.layout.clone_url())
    }

    /// Queries branch, working tree state and origin of the checkout.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the query cannot be run or fails.
    pub fn status<S: RemoteShell>(&self, shell: &S) -> Result<RepositoryStatus, RepositoryError> {
        let command = RemoteCommand::new(
            status_script(self.layout.remote_path()),
            self.settings.query_timeout,
        );
        let output = shell.run(&command)?;
        if !output.is_success() {
            return Err(RepositoryError::Query {
                detail: output.failure_detail(),
            });
        }
        Ok(parse_status(&output.stdout))
    }

    fn status_or_warn<S: RemoteShell>(
        &self,
        shell: &S,
        warnings: &mut Vec<String>,
    ) -> Option<RepositoryStatus> {
        match self.status(shell) {
            Ok(status) => {
                info!(status = %status, "repository status");
                Some(status)
            }
            Err(err) => {
                let warning = format!("could not read repository status: {err}");
                warn!(%warning, "repository check");
                warnings.push(warning);
                None
            }
        }
    }

    fn clone_into<S: RemoteShell>(&self, shell: &S) -> Result<(), RepositoryError> {
        let url = self.layout.clone_url();
        let path = self.layout.remote_path();
        info!(url, path, "cloning repository");

        let script = format!(
            "mkdir -p {parent} && git clone {url} {path}",
            parent = quote(self.layout.parent()),
            url = quote(url),
            path = quote(path),
        );
        let command = RemoteCommand::new(script, self.settings.clone_timeout)
            .forward_agent(self.settings.forward_agent);

        let detail = match shell.run(&command) {
            Ok(output) if output.is_success() => {
                info!(path, "repository cloned");
                return Ok(());
            }
            Ok(output) => output.failure_detail(),
            Err(err) => err.to_string(),
        };

        let leftover = match self.presence(shell) {
            Ok(RepositoryPresence::Absent) => PartialCheckout::Nothing,
            Ok(_) => {
                warn!(path, "clone failed and left a directory behind; it was not removed");
                PartialCheckout::Left
            }
            Err(err) => {
                warn!(path, error = %err, "could not check what the failed clone left behind");
                PartialCheckout::Unknown {
                    reason: err.to_string(),
                }
            }
        };
        Err(RepositoryError::CloneFailed {
            url: url.to_owned(),
            path: path.to_owned(),
            detail,
            leftover,
        })
    }
}

/// Prints one `state=` line and, for repositories, one `origin=` line. An
/// unborn `HEAD` is reported as `empty`; only a `.git` git rejects is
/// `incomplete`.
fn presence_script(remote_path: &str) -> String {
    let path = quote(remote_path);
    format!(
        "if [ ! -e {path} ]; then echo state=absent; \
         elif [ ! -d {path}/.git ]; then echo state=plain; \
         elif [ ! -f {path}/.git/HEAD ] || ! git -C {path} rev-parse --git-dir >/dev/null 2>&1; then echo state=incomplete; \
         else if git -C {path} rev-parse --verify --quiet HEAD >/dev/null 2>&1; then echo state=repository; else echo state=empty; fi; \
         printf 'origin=%s\\n' \"$(git -C {path} remote get-url origin 2>/dev/null)\"; fi"
    )
}

fn status_script(remote_path: &str) -> String {
    let path = quote(remote_path);
    format!(
        "printf 'branch=%s\\n' \"$(git -C {path} symbolic-ref --quiet --short HEAD 2>/dev/null)\" && \
         if [ -n \"$(git -C {path} status --porcelain 2>/dev/null)\" ]; then echo dirty=true; else echo dirty=false; fi && \
         printf 'origin=%s\\n' \"$(git -C {path} remote get-url origin 2>/dev/null)\""
    )
}

fn field<'a>(stdout: &'a str, key: &str) -> Option<&'a str> {
    stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(str::trim)
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|text| !text.is_empty()).map(str::to_owned)
}

fn parse_presence(stdout: &str, expected_url: &str) -> Result<RepositoryPresence, RepositoryError> {
    match field(stdout, "state") {
        Some("absent") => Ok(RepositoryPresence::Absent),
        Some("plain") => Ok(RepositoryPresence::NotARepository),
        Some("incomplete") => Ok(RepositoryPresence::Incomplete),
        Some(state @ ("repository" | "empty")) => Ok(match non_empty(field(stdout, "origin")) {
            Some(actual) if !same_remote(&actual, expected_url) => {
                RepositoryPresence::DivergentRemote { actual }
            }
            _ if state == "empty" => RepositoryPresence::Empty,
            _ => RepositoryPresence::Present,
        }),
        Some(other) => Err(RepositoryError::Query {
            detail: format!("unknown state '{other}'"),
        }),
        None => Err(RepositoryError::Query {
            detail: String::from("missing state line"),
        }),
    }
}

fn parse_status(stdout: &str) -> RepositoryStatus {
    RepositoryStatus {
        branch: non_empty(field(stdout, "branch")),
        dirty: field(stdout, "dirty") == Some("true"),
        origin: non_empty(field(stdout, "origin")),
    }
}

/// Compares remotes ignoring a trailing `/` or `.git`.
fn same_remote(left: &str, right: &str) -> bool {
    fn normalise(url: &str) -> &str {
        let trimmed = url.trim().trim_end_matches('/');
        trimmed.strip_suffix(".git").unwrap_or(trimmed)
    }
    normalise(left) == normalise(right)
}
