//! Command-line interface definitions for the `code-remote` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `code-remote` binary.
#[derive(Debug, Parser)]
#[command(
    name = "code-remote",
    version,
    about = "Start a cloud development instance, make sure the project is checked out there, and open it in a remote editor session",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Local project folder. Its name is used as the directory on the
    /// instance and in the clone URL.
    #[arg(value_name = "PROJECT_FOLDER")]
    pub(crate) project_folder: String,
    /// Instance to connect to [default: default-instance].
    #[arg(value_name = "REMOTE")]
    pub(crate) remote: Option<String>,
    /// Cloud project owning the instance [default: software-265220].
    #[arg(long, value_name = "ID")]
    pub(crate) project_id: Option<String>,
    /// Zone hosting the instance [default: us-west2-b].
    #[arg(long, value_name = "ZONE")]
    pub(crate) zone: Option<String>,
    /// Directory on the instance holding checkouts [default: /data/manas/].
    #[arg(long, value_name = "DIR")]
    pub(crate) remote_home: Option<String>,
    /// Prefix of the clone URL [default: git@github.com:recogni].
    #[arg(long, value_name = "PREFIX")]
    pub(crate) repo_origin: Option<String>,
    /// Do not forward the local SSH agent.
    #[arg(long)]
    pub(crate) no_ssh_forwarding: bool,
    /// Fail instead of cloning when the repository is absent.
    #[arg(long)]
    pub(crate) no_auto_clone: bool,
    /// Only check that SSH agent forwarding works, then exit.
    #[arg(long, conflicts_with = "no_ssh_forwarding")]
    pub(crate) test_ssh_forwarding: bool,
    /// Remote transport used for commands on the instance.
    #[arg(long, value_name = "TRANSPORT", value_parser = ["gcloud", "ssh"])]
    pub(crate) transport: Option<String>,
    /// SSH host alias used by the editor and the ssh transport.
    #[arg(long, value_name = "ALIAS")]
    pub(crate) ssh_host: Option<String>,
    /// Editor command-line launcher [default: code].
    #[arg(long, value_name = "BIN")]
    pub(crate) editor: Option<String>,
    /// Log external commands and other debugging detail. `RUST_LOG` wins when set.
    #[arg(short, long)]
    pub(crate) verbose: bool,
}
