//! Integration tests for configuration loading and validation.

use code_remote::config::{ConfigError, LauncherConfig, WorkflowConfig};
use code_remote::test_support::EnvGuard;
use rstest::*;

#[fixture]
fn valid_config() -> LauncherConfig {
    LauncherConfig::default()
}

#[rstest]
fn defaults_are_valid(valid_config: LauncherConfig) {
    valid_config.validate().expect("defaults validate");
    assert_eq!(valid_config.instance, "default-instance");
    assert_eq!(valid_config.remote_home, "/data/manas/");
    assert_eq!(valid_config.repo_origin, "git@github.com:recogni");
    assert!(!valid_config.no_ssh_forwarding);
    assert!(!valid_config.no_auto_clone);
}

#[test]
fn config_validation_rejects_missing_zone_with_actionable_error() {
    let cfg = LauncherConfig {
        zone: String::from("   "),
        ..valid_config()
    };

    let error = cfg.validate().expect_err("zone is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error");
    };
    assert!(
        message.contains("CODE_REMOTE_ZONE"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("code-remote.toml"),
        "error should mention config file: {message}"
    );
}

/// Every required string names both the environment variable and the
/// configuration key that supply it.
#[rstest]
#[case::instance("CODE_REMOTE_INSTANCE", "instance")]
#[case::project("CODE_REMOTE_PROJECT_ID", "project_id")]
#[case::remote_home("CODE_REMOTE_REMOTE_HOME", "remote_home")]
#[case::repo_origin("CODE_REMOTE_REPO_ORIGIN", "repo_origin")]
#[case::gcloud("CODE_REMOTE_GCLOUD_BIN", "gcloud_bin")]
#[case::ssh("CODE_REMOTE_SSH_BIN", "ssh_bin")]
#[case::editor("CODE_REMOTE_EDITOR_BIN", "editor_bin")]
fn empty_fields_produce_actionable_errors(
    valid_config: LauncherConfig,
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    let field = match toml_key {
        "instance" => &mut cfg.instance,
        "project_id" => &mut cfg.project_id,
        "remote_home" => &mut cfg.remote_home,
        "repo_origin" => &mut cfg.repo_origin,
        "gcloud_bin" => &mut cfg.gcloud_bin,
        "ssh_bin" => &mut cfg.ssh_bin,
        _ => &mut cfg.editor_bin,
    };
    field.clear();

    let message = cfg.validate().expect_err("validation should fail").to_string();
    assert!(message.contains(env_var), "error should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "error should mention {toml_key}: {message}");
    assert!(message.contains("code-remote.toml"), "{message}");
}

#[rstest]
fn zero_connect_attempts_are_rejected(valid_config: LauncherConfig) {
    let cfg = LauncherConfig {
        connect_attempts: 0,
        ..valid_config
    };

    let error = cfg.validate().expect_err("zero attempts");
    let ConfigError::InvalidValue(message) = error else {
        panic!("expected InvalidValue error");
    };
    assert!(message.contains("CODE_REMOTE_CONNECT_ATTEMPTS"), "{message}");
}

#[rstest]
fn zero_delays_are_accepted(valid_config: LauncherConfig) {
    let cfg = LauncherConfig {
        poll_interval_secs: 0,
        connect_retry_delay_secs: 0,
        start_retry_backoff_secs: 0,
        launch_grace_millis: 0,
        ..valid_config
    };

    cfg.validate().expect("delays may be zero");
}

#[rstest]
fn unknown_transport_is_rejected(valid_config: LauncherConfig) {
    let cfg = LauncherConfig {
        transport: String::from("telnet"),
        ..valid_config
    };

    let error = cfg.validate().expect_err("unknown transport");
    assert!(matches!(error, ConfigError::InvalidValue(_)));
    assert!(error.to_string().contains("CODE_REMOTE_TRANSPORT"));
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("CODE_REMOTE_INSTANCE", "gpu-box"),
        ("CODE_REMOTE_ZONE", "europe-west4-a"),
        ("CODE_REMOTE_NO_AUTO_CLONE", "true"),
        ("CODE_REMOTE_CONNECT_ATTEMPTS", "2"),
    ])
    .await;

    let cfg = LauncherConfig::load_without_cli_args().expect("load config");

    assert_eq!(cfg.instance, "gpu-box");
    assert_eq!(cfg.zone, "europe-west4-a");
    assert!(cfg.no_auto_clone);
    assert!(!cfg.no_ssh_forwarding);
    assert_eq!(cfg.connect_attempts, 2);
    assert_eq!(cfg.project_id, "software-265220");
}

/// A plain load with no file and no variables must leave forwarding and
/// cloning switched on.
#[tokio::test]
async fn forwarding_and_cloning_are_enabled_after_a_plain_load() {
    let _guard = EnvGuard::set_vars(&[]).await;

    let cfg = LauncherConfig::load_without_cli_args().expect("load config");
    assert!(!cfg.no_ssh_forwarding);
    assert!(!cfg.no_auto_clone);

    let workflow = WorkflowConfig::builder(cfg)
        .project_folder("widgets")
        .build()
        .expect("valid workflow config");
    assert!(workflow.ssh_forwarding());
    assert!(workflow.auto_clone());
    assert!(workflow.repository_settings().forward_agent);
}

#[tokio::test]
async fn disabling_forwarding_through_the_environment_sticks() {
    let _guard = EnvGuard::set_vars(&[("CODE_REMOTE_NO_SSH_FORWARDING", "true")]).await;

    let cfg = LauncherConfig::load_without_cli_args().expect("load config");
    let workflow = WorkflowConfig::builder(cfg)
        .project_folder("widgets")
        .build()
        .expect("valid workflow config");
    assert!(!workflow.ssh_forwarding());
    assert!(workflow.auto_clone());
}
