use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use tracing::{debug, warn};

use crate::{CommandOutput, CommandRunner, ServiceError, ServiceSupervisor, SystemCommandRunner};

const LAUNCHCTL: &str = "launchctl";
const DAEMON_DIR: &str = "/Library/LaunchDaemons";
const PLIST_SEARCH_DIRS: [&str; 4] = [
    "/Library/LaunchDaemons",
    "/Library/LaunchAgents",
    "/System/Library/LaunchDaemons",
    "/System/Library/LaunchAgents",
];
// launchctl: "Could not find service in domain for port"
const EXIT_NO_SUCH_SERVICE: i32 = 113;

pub struct LaunchdSupervisor<R = SystemCommandRunner> {
    runner: R,
    daemon_dir: PathBuf,
    search_dirs: Vec<PathBuf>,
    log_dir: PathBuf,
}

impl LaunchdSupervisor<SystemCommandRunner> {
    pub fn new() -> Self {
        Self::with_runner(
            SystemCommandRunner,
            PathBuf::from(DAEMON_DIR),
            PLIST_SEARCH_DIRS.iter().map(PathBuf::from).collect(),
            PathBuf::from("/var/log"),
        )
    }
}

impl Default for LaunchdSupervisor<SystemCommandRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> LaunchdSupervisor<R> {
    pub fn with_runner(
        runner: R,
        daemon_dir: PathBuf,
        search_dirs: Vec<PathBuf>,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            daemon_dir,
            search_dirs,
            log_dir,
        }
    }

    pub fn plist_path(&self, name: &str) -> PathBuf {
        self.daemon_dir.join(format!("{name}.plist"))
    }

    fn launchctl(&self, args: &[&str]) -> Result<CommandOutput, ServiceError> {
        Ok(self.runner.run(LAUNCHCTL, args)?)
    }

    fn checked(&self, action: &'static str, name: &str, args: &[&str]) -> Result<(), ServiceError> {
        let output = self.launchctl(args)?;
        if output.success {
            return Ok(());
        }
        if service_missing(&output) {
            return Err(ServiceError::not_registered(name));
        }
        Err(ServiceError::Command {
            action,
            name: name.to_string(),
            detail: output.describe(),
        })
    }
}

impl<R: CommandRunner> ServiceSupervisor for LaunchdSupervisor<R> {
    fn stop(&self, name: &str) -> Result<(), ServiceError> {
        self.checked("stop", name, &["stop", name])
    }

    fn uninstall(&self, name: &str) -> Result<(), ServiceError> {
        let plist_path = self.plist_path(name);
        if !plist_path.exists() {
            return Err(ServiceError::not_registered(name));
        }

        let plist_arg = plist_path.display().to_string();
        let output = self.launchctl(&["unload", plist_arg.as_str()])?;
        if !output.success {
            // An unloaded job still has its plist; removing it is what matters.
            warn!(service = name, detail = %output.describe(), "launchctl unload failed");
        }

        match fs::remove_file(&plist_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("failed to remove plist: {}", plist_path.display()))
                .into()),
        }
    }

    fn install(&self, name: &str, binary_path: &Path) -> Result<(), ServiceError> {
        let plist_path = self.plist_path(name);
        fs::create_dir_all(&self.daemon_dir).with_context(|| {
            format!("failed to create daemon directory: {}", self.daemon_dir.display())
        })?;
        fs::write(
            &plist_path,
            render_launchd_plist(name, binary_path, &self.log_dir),
        )
        .with_context(|| format!("failed to write plist: {}", plist_path.display()))?;
        debug!(plist = %plist_path.display(), "wrote launchd plist");

        let plist_arg = plist_path.display().to_string();
        self.checked("load", name, &["load", plist_arg.as_str()])
    }

    fn start(&self, name: &str) -> Result<(), ServiceError> {
        self.checked("start", name, &["start", name])
    }

    fn is_running(&self, name: &str) -> Result<bool, ServiceError> {
        let output = self.launchctl(&["list", name])?;
        Ok(output.success && launchd_list_reports_running(&output.stdout))
    }

    fn service_binary_path(&self, name: &str) -> Result<PathBuf, ServiceError> {
        let candidates = [format!("{name}.plist"), format!("com.{name}.plist")];
        for dir in &self.search_dirs {
            for file_name in &candidates {
                let plist_path = dir.join(file_name);
                let content = match fs::read_to_string(&plist_path) {
                    Ok(content) => content,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        warn!(plist = %plist_path.display(), error = %err, "failed to read plist");
                        continue;
                    }
                };
                return parse_plist_program_path(&content).ok_or_else(|| {
                    anyhow!(
                        "ProgramArguments not found in plist {}",
                        plist_path.display()
                    )
                    .into()
                });
            }
        }
        Err(ServiceError::not_registered(name))
    }
}

fn service_missing(output: &CommandOutput) -> bool {
    if output.code == Some(EXIT_NO_SUCH_SERVICE) {
        return true;
    }
    let text = output.combined().to_ascii_lowercase();
    text.contains("could not find") || text.contains("no such process")
}

pub fn render_launchd_plist(name: &str, binary_path: &Path, log_dir: &Path) -> String {
    let label = xml_escape(name);
    let program = xml_escape(&binary_path.display().to_string());
    let stdout_path = xml_escape(&log_dir.join(format!("{name}.log")).display().to_string());
    let stderr_path = xml_escape(&log_dir.join(format!("{name}.err")).display().to_string());
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>Label</key>
	<string>{label}</string>
	<key>ProgramArguments</key>
	<array>
		<string>{program}</string>
	</array>
	<key>RunAtLoad</key>
	<true/>
	<key>KeepAlive</key>
	<true/>
	<key>StandardOutPath</key>
	<string>{stdout_path}</string>
	<key>StandardErrorPath</key>
	<string>{stderr_path}</string>
</dict>
</plist>
"#
    )
}

/// `launchctl list <label>` prints `"PID" = 123;` while the job runs.
pub fn launchd_list_reports_running(output: &str) -> bool {
    output
        .lines()
        .filter(|line| line.contains("PID"))
        .filter_map(|line| line.split_once('='))
        .any(|(_, value)| {
            let digits: String = value
                .trim()
                .chars()
                .take_while(|ch| ch.is_ascii_digit())
                .collect();
            digits.parse::<u64>().is_ok_and(|pid| pid > 0)
        })
}

/// First `<string>` of `ProgramArguments`, falling back to `Program`.
pub fn parse_plist_program_path(content: &str) -> Option<PathBuf> {
    if let Some(array) = value_after_key(content, "ProgramArguments") {
        let array = array.trim_start();
        if array.starts_with("<array>") {
            let end = array.find("</array>").unwrap_or(array.len());
            if let Some(first) = first_string(&array[..end]) {
                return Some(PathBuf::from(first));
            }
        }
    }

    let program = value_after_key(content, "Program")?;
    let program = program.trim_start();
    if !program.starts_with("<string>") {
        return None;
    }
    first_string(program).map(PathBuf::from)
}

fn value_after_key<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    let marker = format!("<key>{key}</key>");
    let start = content.find(&marker)? + marker.len();
    Some(&content[start..])
}

fn first_string(fragment: &str) -> Option<String> {
    let start = fragment.find("<string>")? + "<string>".len();
    let len = fragment[start..].find("</string>")?;
    let value = xml_unescape(fragment[start..start + len].trim());
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
