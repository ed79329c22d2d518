use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use keeper_core::run_with_timeout;
use tracing::debug;

use crate::{parse_module_info, VersionSource};

#[derive(Debug, Clone)]
pub struct GoListVersionSource {
    go_binary: PathBuf,
    timeout: Duration,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

impl GoListVersionSource {
    pub fn new() -> Self {
        Self::with_go_binary("go")
    }

    pub fn with_go_binary(go_binary: impl Into<PathBuf>) -> Self {
        Self {
            go_binary: go_binary.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bounds the whole `go list` run, including any module download.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for GoListVersionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionSource for GoListVersionSource {
    fn latest(&self, module: &str) -> Result<String> {
        let query = format!("{module}@latest");
        debug!(go = %self.go_binary.display(), %query, "querying latest module version");
        let mut command = Command::new(&self.go_binary);
        command.arg("list").arg("-m").arg("-json").arg(&query);
        let output = run_with_timeout(&mut command, self.timeout).with_context(|| {
            format!(
                "version-query-failed: {} list for '{module}' did not complete",
                self.go_binary.display()
            )
        })?;
        if !output.status.success() {
            anyhow::bail!(
                "version-query-failed: go list -m -json {query} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let info = parse_module_info(&String::from_utf8_lossy(&output.stdout), module)?;
        Ok(info.version)
    }
}
