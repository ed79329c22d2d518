use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }

    pub fn describe(&self) -> String {
        let status = self
            .code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        format!(
            "status={status} stdout='{}' stderr='{}'",
            self.stdout.trim(),
            self.stderr.trim()
        )
    }
}

/// Runs OS service-management tools. A non-zero exit is reported through
/// [`CommandOutput::success`]; only a failure to spawn is an `Err`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!(program, args = ?args, "running service command");
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to start '{program}'"))?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
