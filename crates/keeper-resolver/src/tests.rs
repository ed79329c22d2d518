use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use keeper_core::{AgentDescriptor, DetectionMethod, ManualOverride};
use keeper_service::{ServiceError, ServiceSupervisor};

use super::*;

fn test_dir(label: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time must be after epoch")
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "keeper-resolver-{label}-{}-{nanos}-{seq}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("must create test dir");
    dir
}

fn write_binary(path: &Path, executable: bool) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create binary parent");
    }
    fs::write(path, b"#!/bin/sh\necho v1.6.116\n").expect("must write binary");
    set_executable(path, executable);
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("must set permissions");
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) {}

struct RegisteredService(Option<PathBuf>);

impl ServiceSupervisor for RegisteredService {
    fn stop(&self, _name: &str) -> Result<(), ServiceError> {
        Ok(())
    }

    fn uninstall(&self, _name: &str) -> Result<(), ServiceError> {
        Ok(())
    }

    fn install(&self, _name: &str, _binary_path: &Path) -> Result<(), ServiceError> {
        Ok(())
    }

    fn start(&self, _name: &str) -> Result<(), ServiceError> {
        Ok(())
    }

    fn is_running(&self, _name: &str) -> Result<bool, ServiceError> {
        Ok(true)
    }

    fn service_binary_path(&self, name: &str) -> Result<PathBuf, ServiceError> {
        self.0
            .clone()
            .ok_or_else(|| ServiceError::not_registered(name))
    }
}

struct StaticProcesses(Vec<ProcessEntry>);

impl ProcessTable for StaticProcesses {
    fn processes(&self) -> Vec<ProcessEntry> {
        self.0.clone()
    }
}

struct Counted {
    inner: Box<dyn DetectionStrategy>,
    strategy_runs: Arc<AtomicUsize>,
}

impl DetectionStrategy for Counted {
    fn method(&self) -> DetectionMethod {
        self.inner.method()
    }

    fn detect(&self) -> Result<PathBuf> {
        self.strategy_runs.fetch_add(1, Ordering::SeqCst);
        self.inner.detect()
    }

    fn searched_locations(&self) -> Vec<PathBuf> {
        self.inner.searched_locations()
    }
}

fn counted(inner: impl DetectionStrategy + 'static, strategy_runs: &Arc<AtomicUsize>) -> Box<dyn DetectionStrategy> {
    Box::new(Counted {
        inner: Box::new(inner),
        strategy_runs: Arc::clone(strategy_runs),
    })
}

fn platform() -> Platform {
    Platform::current()
}

/// Every strategy fails except the conventional location list.
fn common_paths_only_resolver(
    dir: &Path,
    conventional: Vec<PathBuf>,
    strategy_runs: &Arc<AtomicUsize>,
) -> BinaryResolver {
    let exe = platform().executable_name("sentinel");
    let strategies = vec![
        counted(
            ServiceConfigStrategy::new(Arc::new(RegisteredService(None)), "sentinelgo"),
            strategy_runs,
        ),
        counted(
            RunningProcessStrategy::new(Box::new(StaticProcesses(Vec::new())), &exe, platform()),
            strategy_runs,
        ),
        counted(
            PathSearchStrategy::new(&exe, vec![dir.join("empty-bin")], platform()),
            strategy_runs,
        ),
        counted(CommonPathsStrategy::new(conventional, platform()), strategy_runs),
    ];
    BinaryResolver::new(
        AgentDescriptor::default(),
        platform(),
        Arc::new(PathCache::new()),
        strategies,
        dir.join("state/updater-config.json"),
    )
}

#[test]
fn validate_binary_reports_each_rejection_reason() {
    let dir = test_dir("validate");
    let missing = dir.join("missing");
    let err = validate_binary(&missing, platform()).expect_err("missing file must fail");
    assert!(err.to_string().contains("does not exist"));

    let err = validate_binary(&dir, platform()).expect_err("directory must fail");
    assert!(err.to_string().contains("directory"));

    let err = validate_binary(Path::new(""), platform()).expect_err("empty path must fail");
    assert!(err.to_string().contains("empty"));

    let good = dir.join("sentinel");
    write_binary(&good, true);
    validate_binary(&good, platform()).expect("executable file must validate");

    let _ = fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn validate_binary_requires_execute_bit_on_unix() {
    let dir = test_dir("validate-mode");
    let plain = dir.join("sentinel");
    write_binary(&plain, false);

    let err = validate_binary(&plain, Platform::Linux).expect_err("non-executable must fail");
    assert!(err.to_string().contains("not executable"));
    validate_binary(&plain, Platform::Windows).expect("windows does not check mode bits");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn stale_cache_entry_falls_back_to_detection_and_reports_failure() {
    let dir = test_dir("scenario-c");
    let installed = dir.join("opt/sentinelgo").join(platform().executable_name("sentinel"));
    write_binary(&installed, true);
    let strategy_runs = Arc::new(AtomicUsize::new(0));
    let resolver = common_paths_only_resolver(
        &dir,
        vec![dir.join("usr/local/bin/sentinel"), installed.clone()],
        &strategy_runs,
    );

    let resolved = resolver.resolve().expect("conventional location must resolve");
    assert_eq!(resolved.path, installed);
    assert_eq!(resolved.method, DetectionMethod::CommonPaths);
    assert_eq!(
        resolver.cache().get().map(|cached| cached.path),
        Some(installed.clone())
    );
    assert_eq!(strategy_runs.load(Ordering::SeqCst), 4);

    fs::remove_file(&installed).expect("must delete installed binary");

    let report = resolver.resolve().expect_err("deleted binary must not resolve");
    assert_eq!(strategy_runs.load(Ordering::SeqCst), 8, "strategies must re-run");
    assert!(resolver.cache().get().is_none(), "stale entry must be dropped");
    assert_eq!(report.failures.len(), 4);
    assert_eq!(
        report
            .failures
            .iter()
            .map(|failure| failure.method)
            .collect::<Vec<_>>(),
        vec![
            DetectionMethod::ServiceConfig,
            DetectionMethod::RunningProcess,
            DetectionMethod::PathSearch,
            DetectionMethod::CommonPaths,
        ]
    );

    let rendered = report.render();
    assert!(rendered.contains("ATTEMPTED DETECTION METHODS:"));
    assert!(rendered.contains("TROUBLESHOOTING STEPS:"));
    assert!(rendered.contains("SEARCHED LOCATIONS:"));
    assert!(rendered.contains(&installed.display().to_string()));
    assert!(rendered.contains(&dir.join("empty-bin").display().to_string()));
    assert!(rendered.contains("updater-config.json"));
    assert!(rendered.contains("\"enableAutoDetection\": true"));
    assert!(rendered.contains("NEXT STEPS:"));
    assert!(report.to_string().contains("after trying 4 methods"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn consecutive_resolves_run_strategies_only_once() {
    let dir = test_dir("cache-hit");
    let installed = dir.join("bin").join(platform().executable_name("sentinel"));
    write_binary(&installed, true);
    let strategy_runs = Arc::new(AtomicUsize::new(0));
    let resolver = common_paths_only_resolver(&dir, vec![installed.clone()], &strategy_runs);

    let first = resolver.resolve().expect("first resolve must succeed");
    let after_first = strategy_runs.load(Ordering::SeqCst);
    let second = resolver.resolve().expect("second resolve must succeed");

    assert_eq!(first, second);
    assert_eq!(strategy_runs.load(Ordering::SeqCst), after_first);

    resolver.invalidate();
    resolver.resolve().expect("resolve after invalidation must succeed");
    assert_eq!(strategy_runs.load(Ordering::SeqCst), after_first * 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn valid_manual_override_wins_without_probing() {
    let dir = test_dir("override");
    let custom = dir.join("custom").join(platform().executable_name("sentinel"));
    write_binary(&custom, true);
    let strategy_runs = Arc::new(AtomicUsize::new(0));
    let resolver = common_paths_only_resolver(&dir, Vec::new(), &strategy_runs).with_manual_override(
        Some(ManualOverride {
            binary_path: Some(custom.clone()),
            enable_auto_detection: true,
        }),
    );

    let resolved = resolver.resolve().expect("override must resolve");

    assert_eq!(resolved.path, custom);
    assert_eq!(resolved.method, DetectionMethod::ManualConfiguration);
    assert_eq!(strategy_runs.load(Ordering::SeqCst), 0);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn invalid_manual_override_falls_through_even_when_auto_detection_disabled() {
    let dir = test_dir("override-invalid");
    let installed = dir.join("opt").join(platform().executable_name("sentinel"));
    write_binary(&installed, true);
    let strategy_runs = Arc::new(AtomicUsize::new(0));
    let resolver = common_paths_only_resolver(&dir, vec![installed.clone()], &strategy_runs)
        .with_manual_override(Some(ManualOverride {
            binary_path: Some(dir.join("nowhere/sentinel")),
            enable_auto_detection: false,
        }));

    let resolved = resolver.resolve().expect("auto-detection must still run");

    assert_eq!(resolved.path, installed);
    assert_eq!(resolved.method, DetectionMethod::CommonPaths);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn service_config_path_wins_when_valid() {
    let dir = test_dir("service-config");
    let registered = dir.join("srv").join(platform().executable_name("sentinel"));
    write_binary(&registered, true);
    let resolver = BinaryResolver::new(
        AgentDescriptor::default(),
        platform(),
        Arc::new(PathCache::new()),
        vec![Box::new(ServiceConfigStrategy::new(
            Arc::new(RegisteredService(Some(registered.clone()))),
            "sentinelgo",
        ))],
        dir.join("updater-config.json"),
    );

    let resolved = resolver.resolve().expect("service config must resolve");
    assert_eq!(resolved.path, registered);
    assert_eq!(resolved.method, DetectionMethod::ServiceConfig);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn invalid_candidate_is_recorded_and_next_strategy_runs() {
    let dir = test_dir("invalid-candidate");
    let dangling = dir.join("gone/sentinel");
    let installed = dir.join("opt").join(platform().executable_name("sentinel"));
    write_binary(&installed, true);
    let resolver = BinaryResolver::new(
        AgentDescriptor::default(),
        platform(),
        Arc::new(PathCache::new()),
        vec![
            Box::new(ServiceConfigStrategy::new(
                Arc::new(RegisteredService(Some(dangling.clone()))),
                "sentinelgo",
            )),
            Box::new(CommonPathsStrategy::new(vec![installed.clone()], platform())),
        ],
        dir.join("updater-config.json"),
    );

    let resolved = resolver.resolve().expect("second strategy must resolve");
    assert_eq!(resolved.path, installed);

    let lonely = BinaryResolver::new(
        AgentDescriptor::default(),
        platform(),
        Arc::new(PathCache::new()),
        vec![Box::new(ServiceConfigStrategy::new(
            Arc::new(RegisteredService(Some(dangling.clone()))),
            "sentinelgo",
        ))],
        dir.join("updater-config.json"),
    );
    let report = lonely.resolve().expect_err("dangling path must fail");
    assert_eq!(report.failures[0].path_found, Some(dangling));
    assert!(report.failures[0].reason.contains("does not exist"));
    assert!(report.render().contains("Path Found:"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn running_process_strategy_picks_lowest_matching_pid() {
    let table = StaticProcesses(vec![
        ProcessEntry {
            pid: 900,
            executable: PathBuf::from("/opt/b/sentinel"),
        },
        ProcessEntry {
            pid: 12,
            executable: PathBuf::from("/usr/bin/sentinel-updater"),
        },
        ProcessEntry {
            pid: 300,
            executable: PathBuf::from("/opt/a/sentinel"),
        },
    ]);
    let strategy = RunningProcessStrategy::new(Box::new(table), "sentinel", Platform::Linux);
    assert_eq!(
        strategy.detect().expect("process must match"),
        PathBuf::from("/opt/a/sentinel")
    );

    let windows = RunningProcessStrategy::new(
        Box::new(StaticProcesses(vec![ProcessEntry {
            pid: 4,
            executable: PathBuf::from("Sentinel.EXE"),
        }])),
        "sentinel.exe",
        Platform::Windows,
    );
    windows
        .detect()
        .expect("windows match must ignore case");

    let none = RunningProcessStrategy::new(
        Box::new(StaticProcesses(Vec::new())),
        "sentinel",
        Platform::Linux,
    );
    let err = none.detect().expect_err("empty table must fail");
    assert!(err.to_string().contains("no running process"));
}

#[test]
fn path_search_reports_empty_path() {
    let strategy = PathSearchStrategy::new("sentinel", Vec::new(), Platform::Linux);
    let err = strategy.detect().expect_err("empty PATH must fail");
    assert!(err.to_string().contains("PATH environment variable is empty"));
}

#[test]
fn path_search_prefers_valid_candidate_over_earlier_non_executable() {
    let dir = test_dir("path-search");
    let first = dir.join("a/sentinel");
    let second = dir.join("b/sentinel");
    write_binary(&first, false);
    write_binary(&second, true);
    let strategy = PathSearchStrategy::new(
        "sentinel",
        vec![dir.join("a"), dir.join("b")],
        Platform::Linux,
    );

    let found = strategy.detect().expect("must find a candidate");
    if cfg!(unix) {
        assert_eq!(found, second);
    } else {
        assert_eq!(found, first);
    }

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn common_paths_follow_platform_conventions() {
    let agent = AgentDescriptor::default();
    let env = SearchEnvironment {
        path_dirs: Vec::new(),
        home: Some(PathBuf::from("/home/ops")),
        user_profile: Some(PathBuf::from("C:\\Users\\ops")),
        program_files: Some(PathBuf::from("C:\\Program Files")),
        program_files_x86: None,
    };

    let linux = common_paths(&agent, &env, Platform::Linux);
    assert_eq!(
        linux,
        vec![
            PathBuf::from("/usr/local/bin/sentinel"),
            PathBuf::from("/usr/bin/sentinel"),
            PathBuf::from("/opt/sentinelgo/sentinel"),
            PathBuf::from("/home/ops/go/bin/sentinel"),
            PathBuf::from("/home/ops/.local/bin/sentinel"),
        ]
    );

    let macos = common_paths(&agent, &env, Platform::MacOs);
    assert_eq!(macos.len(), 5);
    assert_eq!(
        macos.last(),
        Some(&PathBuf::from("/Applications/SentinelGo/sentinel"))
    );

    let windows = common_paths(&agent, &env, Platform::Windows);
    assert_eq!(windows.len(), 3);
    assert!(windows
        .iter()
        .all(|path| path.to_string_lossy().ends_with("sentinel.exe")));
}

#[test]
fn report_lists_every_searched_path_directory() {
    let dirs: Vec<PathBuf> = (0..13)
        .map(|index| PathBuf::from(format!("/path/dir{index}")))
        .collect();
    let report = DetectionReport {
        platform: Platform::Linux,
        arch: "x86_64",
        generated_at: chrono::Utc::now(),
        executable: "sentinel".to_string(),
        service_name: "sentinelgo".to_string(),
        install_target: AgentDescriptor::default().install_target("latest"),
        override_file: PathBuf::from("/var/lib/sentinelgo/updater-config.json"),
        failures: vec![StrategyFailure {
            method: DetectionMethod::PathSearch,
            reason: "binary 'sentinel' not found in PATH (searched 13 directories)".to_string(),
            path_found: None,
            searched: dirs,
        }],
    };

    let rendered = report.render();
    for index in 0..13 {
        assert!(
            rendered.contains(&format!("  - /path/dir{index}\n")),
            "/path/dir{index} missing from report"
        );
    }
    assert!(!rendered.contains("more directories"));
    assert!(rendered.contains("$ systemctl status sentinelgo"));
    assert!(rendered.contains(
        "$ go install github.com/BrainStation-23/SentinelGo/cmd/sentinel@latest"
    ));
}
