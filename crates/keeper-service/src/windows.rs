use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tracing::{info, warn};

use crate::{CommandOutput, CommandRunner, ServiceError, ServiceSupervisor, SystemCommandRunner};

const SC: &str = "sc.exe";
const REG: &str = "reg.exe";
const SYSTEM_ENVIRONMENT_KEY: &str =
    r"HKLM\SYSTEM\CurrentControlSet\Control\Session Manager\Environment";
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;
const FAILURE_RESET_SECS: &str = "86400";
const FAILURE_ACTIONS: &str = "restart/60000/restart/60000/restart/60000";

pub struct WindowsScSupervisor<R = SystemCommandRunner> {
    runner: R,
    display_name: String,
}

impl WindowsScSupervisor<SystemCommandRunner> {
    pub fn new(display_name: &str) -> Self {
        Self::with_runner(SystemCommandRunner, display_name)
    }
}

impl<R: CommandRunner> WindowsScSupervisor<R> {
    pub fn with_runner(runner: R, display_name: &str) -> Self {
        Self {
            runner,
            display_name: display_name.to_string(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn sc(&self, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        Ok(self.runner.run(SC, args)?)
    }

    /// Machine PATH from the registry, else the keeper's own PATH.
    fn system_path(&self) -> Option<String> {
        match self.runner.run(REG, &["query", SYSTEM_ENVIRONMENT_KEY, "/v", "Path"]) {
            Ok(output) if output.success => {
                if let Some(path) = parse_reg_query_path(&output.stdout) {
                    return Some(path);
                }
            }
            Ok(output) => {
                warn!(detail = %output.describe(), "could not read system PATH from registry");
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not read system PATH from registry");
            }
        }
        std::env::var("PATH").ok().filter(|path| !path.is_empty())
    }

    /// Gives the service the system PATH so the Go toolchain and C compiler
    /// are found when the agent runs as a service. Failures are only logged.
    fn configure_environment(&self, name: &str) {
        let Some(system_path) = self.system_path() else {
            warn!(service = name, "system PATH is empty; service environment left unset");
            return;
        };
        let key = format!(r"HKLM\SYSTEM\CurrentControlSet\Services\{name}");
        let value = format!("PATH={system_path}");
        let args = [
            "add",
            key.as_str(),
            "/v",
            "Environment",
            "/t",
            "REG_MULTI_SZ",
            "/d",
            value.as_str(),
            "/f",
        ];
        match self.runner.run(REG, &args) {
            Ok(output) if output.success => {
                info!(service = name, "service environment configured with system PATH");
            }
            Ok(output) => {
                warn!(service = name, detail = %output.describe(), "failed to set service environment PATH");
            }
            Err(err) => {
                warn!(service = name, error = %format!("{err:#}"), "failed to set service environment PATH");
            }
        }
    }

    fn checked(&self, action: &'static str, name: &str, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        let output = self.sc(args)?;
        if output.success {
            return Ok(output);
        }
        if sc_reports_not_registered(&output) {
            return Err(ServiceError::not_registered(name));
        }
        Err(ServiceError::Command {
            action,
            name: name.to_string(),
            detail: output.describe(),
        })
    }
}

impl<R: CommandRunner> ServiceSupervisor for WindowsScSupervisor<R> {
    fn stop(&self, name: &str) -> Result<(), ServiceError> {
        let output = self.sc(&["stop", name])?;
        if output.success || output.code == Some(ERROR_SERVICE_NOT_ACTIVE) {
            return Ok(());
        }
        if sc_reports_not_registered(&output) {
            return Err(ServiceError::not_registered(name));
        }
        if output.combined().contains("1062") {
            return Ok(());
        }
        Err(ServiceError::Command {
            action: "stop",
            name: name.to_string(),
            detail: output.describe(),
        })
    }

    fn uninstall(&self, name: &str) -> Result<(), ServiceError> {
        self.checked("delete", name, &["delete", name]).map(|_| ())
    }

    fn install(&self, name: &str, binary_path: &Path) -> Result<(), ServiceError> {
        let bin_path = format!("\"{}\"", binary_path.display());
        let display_name = format!("{} Agent", self.display_name);
        self.checked(
            "create",
            name,
            &[
                "create",
                name,
                "binPath=",
                bin_path.as_str(),
                "start=",
                "auto",
                "DisplayName=",
                display_name.as_str(),
            ],
        )?;
        self.configure_environment(name);

        let reset = format!("reset={FAILURE_RESET_SECS}");
        let actions = format!("actions={FAILURE_ACTIONS}");
        match self.sc(&["failure", name, reset.as_str(), actions.as_str()]) {
            Ok(output) if output.success => {}
            Ok(output) => {
                warn!(service = name, detail = %output.describe(), "failed to configure service failure actions");
            }
            Err(err) => {
                warn!(service = name, error = %err, "failed to configure service failure actions");
            }
        }
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), ServiceError> {
        self.checked("start", name, &["start", name]).map(|_| ())
    }

    fn is_running(&self, name: &str) -> Result<bool, ServiceError> {
        let output = self.sc(&["query", name])?;
        Ok(output.success && sc_query_reports_running(&output.stdout))
    }

    fn service_binary_path(&self, name: &str) -> Result<PathBuf, ServiceError> {
        let output = self.checked("query configuration of", name, &["qc", name])?;
        parse_sc_binary_path(&output.stdout).ok_or_else(|| {
            anyhow!("BINARY_PATH_NAME not found for service '{name}'").into()
        })
    }
}

/// The value of a `reg.exe query ... /v Path` line, e.g.
/// `Path    REG_EXPAND_SZ    C:\Windows\system32;C:\Go\bin`.
pub fn parse_reg_query_path(output: &str) -> Option<String> {
    output.lines().map(str::trim).find_map(|line| {
        let rest = line.strip_prefix("Path")?.trim_start();
        let (kind, value) = rest.split_once(char::is_whitespace)?;
        if !kind.starts_with("REG_") {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

pub fn sc_reports_not_registered(output: &CommandOutput) -> bool {
    if output.code == Some(ERROR_SERVICE_DOES_NOT_EXIST) {
        return true;
    }
    let text = output.combined();
    text.contains("1060") || text.to_ascii_lowercase().contains("does not exist")
}

/// The `STATE` line of `sc.exe query`, e.g. `STATE : 4  RUNNING`.
pub fn sc_query_reports_running(output: &str) -> bool {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("STATE"))
        .is_some_and(|line| line.contains("RUNNING"))
}

pub fn parse_sc_binary_path(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("BINARY_PATH_NAME"))
        .filter_map(|line| line.split_once(':'))
        .find_map(|(_, image_path)| extract_windows_binary_path(image_path))
        .map(PathBuf::from)
}

/// Takes the executable out of a service image path: quoted paths end at
/// the closing quote, UNC paths end after the first `.exe` followed by a
/// space, anything else ends at the first whitespace.
pub fn extract_windows_binary_path(image_path: &str) -> Option<String> {
    let image_path = image_path.trim();
    if image_path.is_empty() {
        return None;
    }

    if let Some(rest) = image_path.strip_prefix('"') {
        return match rest.find('"') {
            Some(0) => None,
            Some(end) => Some(rest[..end].to_string()),
            None => Some(rest.to_string()),
        };
    }

    if image_path.starts_with(r"\\") {
        if let Some(exe_index) = image_path.to_ascii_lowercase().find(".exe") {
            let end = exe_index + ".exe".len();
            let after = &image_path[end..];
            if after.is_empty() || after.starts_with(' ') {
                return Some(image_path[..end].to_string());
            }
        }
    }

    image_path.split_whitespace().next().map(str::to_string)
}
