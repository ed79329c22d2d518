use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keeper_core::{AgentDescriptor, OVERRIDE_FILE_NAME};

/// Files the updater owns under its state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn override_file_path(&self) -> PathBuf {
        self.root.join(OVERRIDE_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn build_bin_dir(&self) -> PathBuf {
        self.build_dir().join("bin")
    }

    pub fn attempts_dir(&self) -> PathBuf {
        self.root.join("attempts")
    }

    pub fn attempt_active_path(&self) -> PathBuf {
        self.attempts_dir().join("active")
    }

    pub fn attempt_metadata_path(&self, attempt_id: &str) -> PathBuf {
        self.attempts_dir().join(format!("{attempt_id}.json"))
    }

    pub fn attempt_journal_path(&self, attempt_id: &str) -> PathBuf {
        self.attempts_dir().join(format!("{attempt_id}.journal"))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.logs_dir(),
            self.build_bin_dir(),
            self.attempts_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_state_dir(agent: &AgentDescriptor) -> Result<PathBuf> {
    if cfg!(windows) {
        let program_data = std::env::var("ProgramData")
            .context("ProgramData is not set; cannot resolve Windows state directory")?;
        return Ok(PathBuf::from(program_data).join(&agent.display_name));
    }

    Ok(PathBuf::from("/var/lib").join(&agent.service_name))
}
