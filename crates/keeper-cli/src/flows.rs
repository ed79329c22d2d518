use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use keeper_core::{KeeperConfig, ManualOverride, VersionSourceKind};
use keeper_installer::{
    default_state_dir, list_attempts, read_active_attempt, recover_interrupted_attempt,
    AttemptMetadata, GoToolchain, StateLayout,
};
use keeper_registry::version_source_from_config;
use keeper_resolver::{BinaryResolver, PathCache};
use keeper_service::{platform_supervisor, ServiceError, ServiceSupervisor};
use keeper_updater::{
    Collaborators, CommandVersionReader, Orchestrator, RetryPolicy, Scheduler, ThreadSleeper,
    VersionStatus,
};
use tracing::warn;

use crate::render::{
    current_output_style, print_status, render_section_header, render_status_line, OutputStyle,
};

const CONFIG_FILE_NAME: &str = "keeper.toml";

pub fn default_config_path() -> PathBuf {
    if cfg!(windows) {
        let program_data =
            std::env::var_os("ProgramData").unwrap_or_else(|| "C:\\ProgramData".into());
        return PathBuf::from(program_data)
            .join("agent-keeper")
            .join(CONFIG_FILE_NAME);
    }
    PathBuf::from("/etc/agent-keeper").join(CONFIG_FILE_NAME)
}

/// Configuration and state layout resolved once per process.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub config: KeeperConfig,
    pub config_path: PathBuf,
    pub layout: StateLayout,
}

impl Runtime {
    pub fn load(config_path: Option<&Path>, state_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);
        let config = KeeperConfig::load(&config_path)?;
        Self::from_config(config, config_path, state_dir)
    }

    pub fn from_config(
        config: KeeperConfig,
        config_path: PathBuf,
        state_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let state_dir = match state_dir.or_else(|| config.state_dir.clone()) {
            Some(state_dir) => state_dir,
            None => default_state_dir(&config.agent)?,
        };
        Ok(Self {
            config,
            config_path,
            layout: StateLayout::new(state_dir),
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config
            .logging
            .directory
            .clone()
            .unwrap_or_else(|| self.layout.logs_dir())
    }

    /// A broken override file is reported and ignored.
    pub fn manual_override(&self) -> Option<ManualOverride> {
        match ManualOverride::load(&self.layout.override_file_path()) {
            Ok(manual) => manual,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ignoring binary path override");
                None
            }
        }
    }

    fn supervisor(&self) -> Arc<dyn ServiceSupervisor> {
        platform_supervisor(&self.config.agent.display_name)
    }

    fn resolver(&self, supervisor: Arc<dyn ServiceSupervisor>) -> BinaryResolver {
        BinaryResolver::for_host(
            self.config.agent.clone(),
            Arc::new(PathCache::new()),
            supervisor,
            self.layout.override_file_path(),
        )
        .with_manual_override(self.manual_override())
    }

    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let supervisor = self.supervisor();
        let resolver = self.resolver(supervisor.clone());
        let update = &self.config.update;
        Ok(Orchestrator::new(Collaborators {
            agent: self.config.agent.clone(),
            resolver,
            supervisor,
            versions: version_source_from_config(&self.config.version_source)?,
            reader: Box::new(CommandVersionReader::new(update.version_arg.clone())),
            toolchain: Box::new(GoToolchain::new(
                self.layout.build_bin_dir(),
                update.compile_timeout(),
            )),
            layout: self.layout.clone(),
            verify_policy: RetryPolicy::from_config(update),
            sleeper: Arc::new(ThreadSleeper),
        }))
    }
}

pub fn run_service_loop(runtime: &Runtime, once: bool) -> Result<()> {
    runtime.layout.ensure_base_dirs()?;
    if let Err(err) = recover_interrupted_attempt(&runtime.layout) {
        warn!(error = %format!("{err:#}"), "could not inspect previous update attempt");
    }

    let orchestrator = runtime.orchestrator()?;
    let mut scheduler = Scheduler::new(
        orchestrator,
        runtime.config.schedule.interval(),
        Arc::new(ThreadSleeper),
    );
    if once {
        scheduler.tick()?;
        return Ok(());
    }
    scheduler.run(None);
    Ok(())
}

pub fn run_check(runtime: &Runtime) -> Result<()> {
    let orchestrator = runtime.orchestrator()?;
    let status = orchestrator.check_version()?;
    for line in format_check_lines(&status, current_output_style()) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_detect(runtime: &Runtime) -> Result<()> {
    let style = current_output_style();
    let resolver = runtime.resolver(runtime.supervisor());
    match resolver.resolve() {
        Ok(resolved) => {
            print_status(
                style,
                "ok",
                &format!(
                    "found {} via {} ({})",
                    resolved.path.display(),
                    resolved.method,
                    resolved.method.description()
                ),
            );
            Ok(())
        }
        Err(report) => {
            println!("{}", report.render());
            Err(anyhow!(report))
        }
    }
}

pub fn run_status(runtime: &Runtime) -> Result<()> {
    let supervisor = runtime.supervisor();
    let service_name = &runtime.config.agent.service_name;
    let snapshot = StatusSnapshot {
        config_path: runtime.config_path.clone(),
        state_dir: runtime.layout.root().to_path_buf(),
        override_file: runtime.layout.override_file_path(),
        override_present: runtime.layout.override_file_path().is_file(),
        service_name: service_name.clone(),
        service_state: ServiceState::from_query(supervisor.is_running(service_name)),
        version_source: describe_version_source(&runtime.config),
        active_attempt: read_active_attempt(&runtime.layout)?,
        last_attempt: list_attempts(&runtime.layout)?.pop(),
    };
    for line in format_status_lines(&snapshot, current_output_style()) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_check_lines(status: &VersionStatus, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "binary: {} (via {})",
        status.binary_path.display(),
        status.method
    ));
    lines.push(format!("installed: {}", status.current));
    lines.push(format!("latest: {}", status.latest));
    lines.push(if status.update_available() {
        render_status_line(
            style,
            "step",
            &format!("update available: {} -> {}", status.current, status.latest),
        )
    } else {
        render_status_line(style, "ok", "up to date")
    });
    lines
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    NotRegistered,
    Unknown(String),
}

impl ServiceState {
    pub fn from_query(result: Result<bool, ServiceError>) -> Self {
        match result {
            Ok(true) => Self::Running,
            Ok(false) => Self::Stopped,
            Err(err) if err.is_not_registered() => Self::NotRegistered,
            Err(err) => Self::Unknown(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub override_file: PathBuf,
    pub override_present: bool,
    pub service_name: String,
    pub service_state: ServiceState,
    pub version_source: String,
    pub active_attempt: Option<String>,
    pub last_attempt: Option<AttemptMetadata>,
}

pub fn describe_version_source(config: &KeeperConfig) -> String {
    match config.version_source.kind {
        VersionSourceKind::GoList => format!("go list -m {}@latest", config.agent.module),
        VersionSourceKind::ModuleProxy => format!(
            "{} ({})",
            config.version_source.proxy_url.trim_end_matches('/'),
            config.agent.module
        ),
    }
}

pub fn format_status_lines(snapshot: &StatusSnapshot, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(header) = render_section_header(style, "agent-keeper") {
        lines.push(header);
    }
    lines.push(format!("config: {}", snapshot.config_path.display()));
    lines.push(format!("state: {}", snapshot.state_dir.display()));
    lines.push(format!(
        "override: {} ({})",
        snapshot.override_file.display(),
        if snapshot.override_present {
            "present"
        } else {
            "absent"
        }
    ));
    lines.push(format!("version source: {}", snapshot.version_source));

    let service = match &snapshot.service_state {
        ServiceState::Running => render_status_line(
            style,
            "ok",
            &format!("service {}: running", snapshot.service_name),
        ),
        ServiceState::Stopped => render_status_line(
            style,
            "warn",
            &format!("service {}: stopped", snapshot.service_name),
        ),
        ServiceState::NotRegistered => render_status_line(
            style,
            "warn",
            &format!("service {}: not registered", snapshot.service_name),
        ),
        ServiceState::Unknown(reason) => render_status_line(
            style,
            "err",
            &format!("service {}: unknown ({reason})", snapshot.service_name),
        ),
    };
    lines.push(service);

    if let Some(attempt_id) = &snapshot.active_attempt {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("update attempt in progress: {attempt_id}"),
        ));
    }

    match &snapshot.last_attempt {
        Some(attempt) => {
            lines.push(format!(
                "last attempt: {} {} -> {} {} at {}",
                attempt.attempt_id,
                attempt.from_version,
                attempt.to_version,
                attempt.status,
                attempt.started_at.to_rfc3339()
            ));
            if attempt.backup_path.is_file() {
                lines.push(format!("backup kept: {}", attempt.backup_path.display()));
            }
        }
        None => lines.push("last attempt: none".to_string()),
    }
    lines
}
