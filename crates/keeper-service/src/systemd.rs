use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::{CommandOutput, CommandRunner, ServiceError, ServiceSupervisor, SystemCommandRunner};

const SYSTEMCTL: &str = "systemctl";
const UNIT_DIR: &str = "/etc/systemd/system";
const UNIT_SEARCH_DIRS: [&str; 3] = [
    "/etc/systemd/system",
    "/lib/systemd/system",
    "/usr/lib/systemd/system",
];
// systemctl: "program or service is not installed"
const EXIT_UNIT_NOT_FOUND: i32 = 5;

pub struct SystemdSupervisor<R = SystemCommandRunner> {
    runner: R,
    display_name: String,
    unit_dir: PathBuf,
    search_dirs: Vec<PathBuf>,
}

impl SystemdSupervisor<SystemCommandRunner> {
    pub fn new(display_name: &str) -> Self {
        Self::with_runner(
            SystemCommandRunner,
            display_name,
            PathBuf::from(UNIT_DIR),
            UNIT_SEARCH_DIRS.iter().map(PathBuf::from).collect(),
        )
    }
}

impl<R: CommandRunner> SystemdSupervisor<R> {
    pub fn with_runner(
        runner: R,
        display_name: &str,
        unit_dir: PathBuf,
        search_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            runner,
            display_name: display_name.to_string(),
            unit_dir,
            search_dirs,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{name}.service"))
    }

    fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        Ok(self.runner.run(SYSTEMCTL, args)?)
    }

    fn checked(&self, action: &'static str, name: &str, args: &[&str]) -> Result<(), ServiceError> {
        let output = self.systemctl(args)?;
        if output.success {
            return Ok(());
        }
        if unit_missing(&output) {
            return Err(ServiceError::not_registered(name));
        }
        Err(ServiceError::Command {
            action,
            name: name.to_string(),
            detail: output.describe(),
        })
    }

    fn daemon_reload(&self, name: &str) -> Result<(), ServiceError> {
        let output = self.systemctl(&["daemon-reload"])?;
        if output.success {
            return Ok(());
        }
        Err(ServiceError::Command {
            action: "reload units for",
            name: name.to_string(),
            detail: output.describe(),
        })
    }
}

impl<R: CommandRunner> ServiceSupervisor for SystemdSupervisor<R> {
    fn stop(&self, name: &str) -> Result<(), ServiceError> {
        self.checked("stop", name, &["stop", name])
    }

    fn uninstall(&self, name: &str) -> Result<(), ServiceError> {
        let unit_path = self.unit_path(name);
        let disabled = self.checked("disable", name, &["disable", name]);
        let unit_missing = match disabled {
            Ok(()) => false,
            Err(ServiceError::NotRegistered { .. }) => true,
            Err(err) => return Err(err),
        };

        let unit_removed = match fs::remove_file(&unit_path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!(
                        "failed to remove unit file: {}",
                        unit_path.display()
                    ))
                    .into());
            }
        };

        if unit_missing && !unit_removed {
            return Err(ServiceError::not_registered(name));
        }
        self.daemon_reload(name)
    }

    fn install(&self, name: &str, binary_path: &Path) -> Result<(), ServiceError> {
        let unit_path = self.unit_path(name);
        fs::create_dir_all(&self.unit_dir).with_context(|| {
            format!("failed to create unit directory: {}", self.unit_dir.display())
        })?;
        fs::write(&unit_path, render_unit_file(&self.display_name, binary_path))
            .with_context(|| format!("failed to write unit file: {}", unit_path.display()))?;
        debug!(unit = %unit_path.display(), "wrote systemd unit");

        self.daemon_reload(name)?;
        self.checked("enable", name, &["enable", name])
    }

    fn start(&self, name: &str) -> Result<(), ServiceError> {
        self.checked("start", name, &["start", name])
    }

    fn is_running(&self, name: &str) -> Result<bool, ServiceError> {
        let output = self.systemctl(&["is-active", name])?;
        Ok(output.success && output.stdout.trim() == "active")
    }

    fn service_binary_path(&self, name: &str) -> Result<PathBuf, ServiceError> {
        let file_name = format!("{name}.service");
        for dir in &self.search_dirs {
            let unit_path = dir.join(&file_name);
            let content = match fs::read_to_string(&unit_path) {
                Ok(content) => content,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(unit = %unit_path.display(), error = %err, "failed to read unit file");
                    continue;
                }
            };
            return parse_unit_exec_start(&content).ok_or_else(|| {
                anyhow::anyhow!(
                    "ExecStart directive not found in unit file {}",
                    unit_path.display()
                )
                .into()
            });
        }
        Err(ServiceError::not_registered(name))
    }
}

fn unit_missing(output: &CommandOutput) -> bool {
    if output.code == Some(EXIT_UNIT_NOT_FOUND) {
        return true;
    }
    let text = output.combined().to_ascii_lowercase();
    text.contains("not loaded") || text.contains("does not exist") || text.contains("not found")
}

pub fn render_unit_file(display_name: &str, binary_path: &Path) -> String {
    format!(
        "[Unit]\n\
         Description={display_name} Agent\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={}\n\
         Restart=always\n\
         RestartSec=10\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        quote_exec_path(binary_path)
    )
}

fn quote_exec_path(path: &Path) -> String {
    let raw = path.display().to_string();
    if raw.contains(char::is_whitespace) {
        format!("\"{raw}\"")
    } else {
        raw
    }
}

/// Returns the executable of the first non-empty `ExecStart=` line.
pub fn parse_unit_exec_start(content: &str) -> Option<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("ExecStart="))
        .find_map(extract_exec_start_path)
        .map(PathBuf::from)
}

/// Strips systemd's `-@:+!` command prefixes, then takes a quoted path or
/// the first whitespace-separated token.
pub fn extract_exec_start_path(value: &str) -> Option<String> {
    let value = value
        .trim()
        .trim_start_matches(['-', '@', ':', '+', '!'])
        .trim();
    if value.is_empty() {
        return None;
    }

    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            if let Some(end) = rest.find(quote) {
                if end > 0 {
                    return Some(rest[..end].to_string());
                }
            }
        }
    }

    value.split_whitespace().next().map(str::to_string)
}
