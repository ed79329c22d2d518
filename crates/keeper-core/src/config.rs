use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::AgentDescriptor;

pub const OVERRIDE_FILE_NAME: &str = "updater-config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct KeeperConfig {
    pub state_dir: Option<PathBuf>,
    pub agent: AgentDescriptor,
    pub schedule: ScheduleConfig,
    pub update: UpdateConfig,
    pub version_source: VersionSourceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct UpdateConfig {
    pub version_arg: String,
    pub verify_attempts: u32,
    pub verify_delay_secs: u64,
    pub compile_timeout_secs: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            version_arg: "--version".to_string(),
            verify_attempts: 3,
            verify_delay_secs: 2,
            compile_timeout_secs: 15 * 60,
        }
    }
}

impl UpdateConfig {
    pub fn verify_delay(&self) -> Duration {
        Duration::from_secs(self.verify_delay_secs)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VersionSourceKind {
    #[default]
    GoList,
    ModuleProxy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VersionSourceConfig {
    pub kind: VersionSourceKind,
    pub proxy_url: String,
    pub timeout_secs: u64,
}

impl Default for VersionSourceConfig {
    fn default() -> Self {
        Self {
            kind: VersionSourceKind::GoList,
            proxy_url: "https://proxy.golang.org".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub file: bool,
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            file: true,
            directory: None,
        }
    }
}

impl KeeperConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse keeper config")?;
        config.validate()?;
        Ok(config)
    }

    /// A missing file is not an error: every field has a default.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read keeper config: {}", path.display()));
            }
        };
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid keeper config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        if self.schedule.interval_secs == 0 {
            return Err(anyhow!("schedule.interval_secs must be greater than zero"));
        }
        if self.update.verify_attempts == 0 {
            return Err(anyhow!("update.verify_attempts must be at least 1"));
        }
        if self.update.version_arg.trim().is_empty() {
            return Err(anyhow!("update.version_arg must not be empty"));
        }
        if self.update.compile_timeout_secs == 0 {
            return Err(anyhow!(
                "update.compile_timeout_secs must be greater than zero"
            ));
        }
        if self.version_source.kind == VersionSourceKind::ModuleProxy
            && !(self.version_source.proxy_url.starts_with("http://")
                || self.version_source.proxy_url.starts_with("https://"))
        {
            return Err(anyhow!(
                "version_source.proxy_url must be an http(s) URL: {}",
                self.version_source.proxy_url
            ));
        }
        Ok(())
    }
}

/// Operator-supplied override pinning the managed binary's location, read
/// from `updater-config.json` in the state directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverride {
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
    #[serde(default = "default_enable_auto_detection")]
    pub enable_auto_detection: bool,
}

fn default_enable_auto_detection() -> bool {
    true
}

impl ManualOverride {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let mut parsed: Self =
            serde_json::from_str(input).context("failed to parse binary path override")?;
        if parsed
            .binary_path
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            parsed.binary_path = None;
        }
        Ok(parsed)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read binary path override: {}", path.display())
                });
            }
        };
        Self::from_json_str(&raw)
            .map(Some)
            .with_context(|| format!("invalid binary path override: {}", path.display()))
    }
}
