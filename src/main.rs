//! Binary entry point for the code-remote CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_remote::{
    ConfigError, ConfigOverrides, FailureKind, ForwardingReport, ForwardingStatus, GcloudBackend,
    GcloudShell, LauncherConfig, ProcessCommandRunner, RemoteShell, SshShell, Transport,
    WorkflowConfig, WorkflowError, WorkflowOrchestrator, WorkflowReport, WorkflowStage,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    const fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Config(_) => Some(FailureKind::ConfigurationInvalid),
            Self::Workflow(err) => Some(err.kind),
            Self::Io(_) => None,
        }
    }

    const fn exit_code(&self) -> i32 {
        match self.kind() {
            Some(kind) => kind.exit_code(),
            None => 1,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            write_failure(io::stderr(), &err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let rust_log = env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), verbose))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// A non-empty, parseable `RUST_LOG` wins; `--verbose` only raises the
/// fallback level.
fn log_filter(rust_log: Option<&str>, verbose: bool) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbose)))
}

const fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "code_remote=debug"
    } else {
        "code_remote=info"
    }
}

fn overrides_from(cli: &Cli) -> ConfigOverrides {
    ConfigOverrides {
        instance: cli.remote.clone(),
        project_id: cli.project_id.clone(),
        zone: cli.zone.clone(),
        remote_home: cli.remote_home.clone(),
        repo_origin: cli.repo_origin.clone(),
        transport: cli.transport.clone(),
        ssh_host: cli.ssh_host.clone(),
        editor_bin: cli.editor.clone(),
        no_ssh_forwarding: cli.no_ssh_forwarding,
        no_auto_clone: cli.no_auto_clone,
        test_ssh_forwarding: cli.test_ssh_forwarding,
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let base = LauncherConfig::load_without_cli_args()?;
    let config = WorkflowConfig::builder(base)
        .project_folder(cli.project_folder.as_str())
        .overrides(overrides_from(&cli))
        .build()?;
    let layout = config.layout();
    info!(
        instance = %config.target(),
        folder = config.folder_name(),
        remote_path = layout.remote_path(),
        clone_url = layout.clone_url(),
        auto_clone = config.auto_clone(),
        ssh_forwarding = config.ssh_forwarding(),
        transport = %config.transport(),
        "configuration loaded"
    );

    let backend = GcloudBackend::with_process_runner(config.gcloud_settings());
    match config.transport() {
        Transport::Gcloud => {
            let shell = GcloudShell::with_process_runner(
                config.gcloud_bin(),
                config.target().clone(),
                config.ssh_host().map(str::to_owned),
            );
            run_with_shell(&config, backend, shell).await
        }
        Transport::Ssh => {
            let host = config.ssh_host().unwrap_or(&config.target().name).to_owned();
            let shell = SshShell::with_process_runner(config.ssh_bin(), host);
            run_with_shell(&config, backend, shell).await
        }
    }
}

async fn run_with_shell<S: RemoteShell>(
    config: &WorkflowConfig,
    backend: GcloudBackend<ProcessCommandRunner>,
    shell: S,
) -> Result<(), CliError> {
    let orchestrator = WorkflowOrchestrator::new(config, backend, shell, ProcessCommandRunner);
    let stdout = io::stdout();
    if config.test_forwarding() {
        let report = orchestrator.test_forwarding().await?;
        write_forwarding_report(stdout.lock(), &report)?;
    } else {
        let report = orchestrator.execute().await?;
        write_report(stdout.lock(), config, &report)?;
    }
    Ok(())
}

fn write_report(
    mut out: impl Write,
    config: &WorkflowConfig,
    report: &WorkflowReport,
) -> io::Result<()> {
    let availability = &report.availability;
    if availability.started {
        writeln!(
            out,
            "instance: {} started (was {})",
            config.target().name,
            availability.initial_state
        )?;
    } else {
        writeln!(out, "instance: {} is running", config.target().name)?;
    }

    writeln!(
        out,
        "connectivity: reachable over SSH (attempts: {})",
        report.connectivity.attempts
    )?;

    match &report.forwarding {
        Some(ForwardingStatus::Working { identities }) => writeln!(
            out,
            "forwarding: working ({} identities)",
            identities.len()
        )?,
        Some(ForwardingStatus::Broken { reason }) => {
            writeln!(out, "forwarding: not working ({reason})")?;
        }
        None => writeln!(out, "forwarding: disabled")?,
    }

    let repository = &report.repository;
    let action = if repository.cloned { "cloned" } else { "present" };
    writeln!(out, "repository: {} {action}", report.remote_path)?;
    if let Some(status) = &repository.status {
        writeln!(out, "repository: {status}")?;
    }
    for warning in &repository.warnings {
        writeln!(out, "warning: {warning}")?;
    }

    writeln!(out, "editor: opened {}", report.launch.uri)?;
    if let Some(instructions) = &report.launch.instructions {
        writeln!(out)?;
        writeln!(out, "To verify SSH agent forwarding:")?;
        for (index, line) in instructions.iter().enumerate() {
            writeln!(out, "  {}. {line}", index + 1)?;
        }
    }
    Ok(())
}

fn write_forwarding_report(mut out: impl Write, report: &ForwardingReport) -> io::Result<()> {
    writeln!(
        out,
        "SSH agent forwarding works ({} identities visible on the instance)",
        report.identities.len()
    )?;
    for identity in &report.identities {
        writeln!(out, "  {identity}")?;
    }
    Ok(())
}

fn write_failure(mut target: impl Write, err: &CliError) {
    let kind = err
        .kind()
        .map_or_else(|| String::from("io"), |kind| kind.to_string());
    writeln!(target, "error[{kind}]: {err}").ok();

    if let CliError::Workflow(failure) = err {
        let steps = failure.stage.completed_steps();
        if steps.is_empty() {
            writeln!(target, "progress: no steps completed").ok();
        } else {
            for step in steps {
                writeln!(target, "progress: {step}").ok();
            }
        }
        if failure.stage < WorkflowStage::Launched {
            writeln!(target, "stopped after: {}", failure.stage).ok();
        }
    }
}
