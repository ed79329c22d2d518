use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use super::*;

#[test]
fn newer_patch_with_more_digits_is_newer() {
    assert!(is_newer("1.6.9", "1.6.10"));
    assert!(is_newer("v1.6.116", "v1.6.121"));
}

#[test]
fn older_latest_is_not_newer() {
    assert!(!is_newer("2.0.0", "1.9.9"));
    assert!(!is_newer("v1.6.121", "v1.6.116"));
}

#[test]
fn identical_versions_are_not_newer() {
    for version in ["1.6.116", "v1.6.116", "0.0.0", "garbage"] {
        assert!(!is_newer(version, version), "{version} must not be newer than itself");
    }
}

#[test]
fn v_prefix_is_ignored_for_equality() {
    assert!(!is_newer("v1.2.3", "1.2.3"));
    assert!(!is_newer("1.2.3", "v1.2.3"));
}

#[test]
fn missing_segments_are_zero() {
    assert_eq!(version_triple("1.6"), [1, 6, 0]);
    assert_eq!(version_triple("2"), [2, 0, 0]);
    assert!(!is_newer("1.6", "1.6.0"));
    assert!(is_newer("1.6", "1.6.1"));
    assert!(is_newer("1", "1.0.1"));
}

#[test]
fn comparison_short_circuits_on_first_unequal_component() {
    assert!(is_newer("1.9.9", "2.0.0"));
    assert!(!is_newer("2.0.0", "1.99.99"));
    assert!(is_newer("1.2.99", "1.3.0"));
}

#[test]
fn non_numeric_suffixes_are_ignored() {
    assert_eq!(version_triple("1.7.0-rc1"), [1, 7, 0]);
    assert_eq!(version_triple("1.x.3"), [1, 0, 3]);
    assert!(!is_newer("1.7.0", "1.7.0-rc1"));
}

#[test]
fn extract_version_token_finds_v_prefixed_token() {
    let token = extract_version_token("SentinelGo v1.6.116 (linux/amd64)\n").expect("must extract");
    assert_eq!(token, "v1.6.116");
}

#[test]
fn extract_version_token_skips_words_starting_with_v() {
    let token = extract_version_token("version: v2.0.1").expect("must extract");
    assert_eq!(token, "v2.0.1");
}

#[test]
fn extract_version_token_falls_back_to_trimmed_output() {
    let token = extract_version_token("  1.2.3  \n").expect("must fall back");
    assert_eq!(token, "1.2.3");
}

#[test]
fn extract_version_token_rejects_empty_output() {
    let err = extract_version_token(" \n\t").expect_err("empty output must fail");
    assert!(err.to_string().contains("empty"));
}

#[test]
fn backup_path_appends_suffix_to_full_file_name() {
    assert_eq!(
        backup_path_for(Path::new("/usr/local/bin/sentinel")),
        PathBuf::from("/usr/local/bin/sentinel.backup")
    );
    assert_eq!(
        backup_path_for(Path::new("/opt/agent/sentinel.exe")),
        PathBuf::from("/opt/agent/sentinel.exe.backup")
    );
    assert_eq!(
        legacy_backup_path_for(Path::new("/usr/local/bin/sentinel")),
        PathBuf::from("/usr/local/bin/sentinel.old")
    );
}

#[test]
fn update_context_derives_paths_from_binary_path() {
    let started_at = Utc::now();
    let context = UpdateContext::new(
        "/opt/sentinelgo/sentinel",
        DetectionMethod::ServiceConfig,
        "v1.6.116",
        "v1.6.121",
        started_at,
    );

    assert_eq!(context.binary_path(), Path::new("/opt/sentinelgo/sentinel"));
    assert_eq!(context.binary_dir(), Path::new("/opt/sentinelgo"));
    assert_eq!(
        context.backup_path(),
        Path::new("/opt/sentinelgo/sentinel.backup")
    );
    assert_eq!(
        context.legacy_backup_path(),
        PathBuf::from("/opt/sentinelgo/sentinel.old")
    );
    assert_eq!(context.current_version(), "v1.6.116");
    assert_eq!(context.target_version(), "v1.6.121");
    assert_eq!(context.started_at(), started_at);
    assert_eq!(context.detection_method(), DetectionMethod::ServiceConfig);
}

#[test]
fn update_context_for_bare_file_name_uses_current_dir() {
    let context = UpdateContext::new(
        "sentinel",
        DetectionMethod::PathSearch,
        "v1.0.0",
        "v1.0.1",
        Utc::now(),
    );
    assert_eq!(context.binary_dir(), Path::new("."));
}

#[test]
fn detection_method_names_are_stable() {
    assert_eq!(DetectionMethod::ServiceConfig.as_str(), "service_config");
    assert_eq!(DetectionMethod::RunningProcess.as_str(), "running_process");
    assert_eq!(DetectionMethod::PathSearch.as_str(), "path_search");
    assert_eq!(DetectionMethod::CommonPaths.as_str(), "common_paths");
    assert_eq!(
        DetectionMethod::ManualConfiguration.to_string(),
        "manual_configuration"
    );
}

#[test]
fn default_config_matches_documented_defaults() {
    let config = KeeperConfig::default();
    assert_eq!(config.schedule.interval(), Duration::from_secs(30));
    assert_eq!(config.update.verify_attempts, 3);
    assert_eq!(config.update.verify_delay(), Duration::from_secs(2));
    assert_eq!(config.update.version_arg, "--version");
    assert_eq!(config.version_source.kind, VersionSourceKind::GoList);
    assert_eq!(config.agent.service_name, "sentinelgo");
    config.validate().expect("defaults must validate");
}

#[test]
fn parse_partial_config_keeps_defaults_for_missing_fields() {
    let content = r#"
state_dir = "/srv/keeper"

[agent]
service_name = "edge-agent"
binary_name = "edge"
module = "example.test/edge"

[schedule]
interval_secs = 120

[version_source]
kind = "module-proxy"
proxy_url = "https://goproxy.example.test"
"#;

    let config = KeeperConfig::from_toml_str(content).expect("config must parse");
    assert_eq!(config.state_dir, Some(PathBuf::from("/srv/keeper")));
    assert_eq!(config.agent.service_name, "edge-agent");
    assert_eq!(config.agent.build_package, "cmd/sentinel");
    assert_eq!(config.schedule.interval_secs, 120);
    assert_eq!(config.update.verify_attempts, 3);
    assert_eq!(config.version_source.kind, VersionSourceKind::ModuleProxy);
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

#[test]
fn config_rejects_zero_interval() {
    let err = KeeperConfig::from_toml_str("[schedule]\ninterval_secs = 0\n")
        .expect_err("zero interval must fail");
    assert!(err.to_string().contains("interval_secs"));
}

#[test]
fn config_rejects_unknown_fields() {
    KeeperConfig::from_toml_str("[schedule]\nintervall_secs = 10\n")
        .expect_err("misspelled field must fail");
}

#[test]
fn config_rejects_path_like_binary_name() {
    let err = KeeperConfig::from_toml_str("[agent]\nbinary_name = \"bin/sentinel\"\n")
        .expect_err("path-like binary name must fail");
    assert!(format!("{err:#}").contains("bare name"));
}

#[test]
fn install_target_joins_module_package_and_version() {
    let agent = AgentDescriptor::default();
    assert_eq!(
        agent.install_target("v1.6.121"),
        "github.com/BrainStation-23/SentinelGo/cmd/sentinel@v1.6.121"
    );

    let root_package = AgentDescriptor {
        build_package: String::new(),
        ..AgentDescriptor::default()
    };
    assert_eq!(
        root_package.install_target("v2.0.0"),
        "github.com/BrainStation-23/SentinelGo@v2.0.0"
    );
}

#[test]
fn manual_override_parses_camel_case_fields() {
    let parsed = ManualOverride::from_json_str(
        r#"{"binaryPath": "/opt/custom/sentinel", "enableAutoDetection": false}"#,
    )
    .expect("override must parse");
    assert_eq!(
        parsed.binary_path,
        Some(PathBuf::from("/opt/custom/sentinel"))
    );
    assert!(!parsed.enable_auto_detection);
}

#[test]
fn manual_override_empty_path_means_no_override() {
    let parsed = ManualOverride::from_json_str(r#"{"binaryPath": ""}"#).expect("must parse");
    assert!(parsed.binary_path.is_none());
    assert!(parsed.enable_auto_detection);
}

#[test]
fn manual_override_missing_file_is_none() {
    let path = std::env::temp_dir().join(format!(
        "keeper-core-missing-override-{}.json",
        std::process::id()
    ));
    let loaded = ManualOverride::load(&path).expect("missing file must not error");
    assert!(loaded.is_none());
}

#[test]
fn manual_override_rejects_malformed_json() {
    ManualOverride::from_json_str("{binaryPath: /opt}").expect_err("malformed JSON must fail");
}

#[cfg(unix)]
#[test]
fn run_with_timeout_captures_output() {
    let mut command = std::process::Command::new("sh");
    command.args(["-c", "echo out; echo err >&2"]);
    let output = run_with_timeout(&mut command, Duration::from_secs(10)).expect("must run");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
    assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
}

#[cfg(unix)]
#[test]
fn run_with_timeout_keeps_failed_exit_status() {
    let mut command = std::process::Command::new("sh");
    command.args(["-c", "echo broken >&2; exit 3"]);
    let output = run_with_timeout(&mut command, Duration::from_secs(10)).expect("must run");
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "broken");
}

#[cfg(unix)]
#[test]
fn run_with_timeout_kills_runaway_process() {
    let started = std::time::Instant::now();
    let mut command = std::process::Command::new("sleep");
    command.arg("30");
    let err = run_with_timeout(&mut command, Duration::from_millis(200))
        .expect_err("runaway process must time out");
    assert!(err.to_string().contains("timed out"), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[cfg(unix)]
#[test]
fn run_with_timeout_bounds_output_held_open_by_grandchild() {
    let started = std::time::Instant::now();
    let mut command = std::process::Command::new("sh");
    command.args(["-c", "sleep 30 & echo started"]);
    let err = run_with_timeout(&mut command, Duration::from_millis(500))
        .expect_err("output held open past the deadline must fail the run");
    assert!(err.to_string().contains("stayed open"), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[test]
fn run_with_timeout_reports_missing_program() {
    let mut command = std::process::Command::new("keeper-core-tests-no-such-program");
    let err = run_with_timeout(&mut command, Duration::from_secs(5))
        .expect_err("missing program must fail to launch");
    assert!(err.to_string().contains("failed launching"), "unexpected error: {err}");
}
