use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Identity of the managed agent: how the OS knows its service, what its
/// executable is called, and where its sources are published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentDescriptor {
    pub service_name: String,
    pub display_name: String,
    pub binary_name: String,
    pub module: String,
    pub build_package: String,
}

impl Default for AgentDescriptor {
    fn default() -> Self {
        Self {
            service_name: "sentinelgo".to_string(),
            display_name: "SentinelGo".to_string(),
            binary_name: "sentinel".to_string(),
            module: "github.com/BrainStation-23/SentinelGo".to_string(),
            build_package: "cmd/sentinel".to_string(),
        }
    }
}

impl AgentDescriptor {
    pub fn executable_name(&self) -> String {
        if cfg!(windows) && !self.binary_name.to_ascii_lowercase().ends_with(".exe") {
            format!("{}.exe", self.binary_name)
        } else {
            self.binary_name.clone()
        }
    }

    pub fn install_target(&self, version: &str) -> String {
        let package = self.build_package.trim_matches('/');
        if package.is_empty() {
            format!("{}@{version}", self.module)
        } else {
            format!("{}/{package}@{version}", self.module)
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("service_name", &self.service_name),
            ("binary_name", &self.binary_name),
            ("module", &self.module),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("agent.{field} must not be empty"));
            }
        }
        for (field, value) in [
            ("service_name", &self.service_name),
            ("binary_name", &self.binary_name),
        ] {
            if value.contains('/') || value.contains('\\') {
                return Err(anyhow!(
                    "agent.{field} must be a bare name, not a path: {value}"
                ));
            }
        }
        Ok(())
    }
}
