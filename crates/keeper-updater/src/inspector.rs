use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use keeper_core::{extract_version_token, run_with_timeout};

const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads the version the installed binary reports about itself.
pub trait VersionReader: Send + Sync {
    fn installed_version(&self, binary: &Path) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct CommandVersionReader {
    version_arg: String,
    timeout: Duration,
}

impl CommandVersionReader {
    pub fn new(version_arg: impl Into<String>) -> Self {
        Self {
            version_arg: version_arg.into(),
            timeout: VERSION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl VersionReader for CommandVersionReader {
    fn installed_version(&self, binary: &Path) -> Result<String> {
        let mut command = Command::new(binary);
        command.arg(&self.version_arg);
        let output = run_with_timeout(&mut command, self.timeout).with_context(|| {
            format!("failed running {} {}", binary.display(), self.version_arg)
        })?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} {} exited with {}: {}",
                binary.display(),
                self.version_arg,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        extract_version_token(&String::from_utf8_lossy(&output.stdout))
            .with_context(|| format!("failed reading version of {}", binary.display()))
    }
}
