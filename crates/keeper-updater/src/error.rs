use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use keeper_resolver::DetectionReport;
use thiserror::Error;

use crate::PhaseFailure;

/// How the scheduler should treat a failed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Nothing changed; retry on the next tick.
    Transient,
    /// The update failed but the previous version is running again.
    RolledBack,
    /// The system may be left without a working agent.
    Critical,
}

#[derive(Debug, Error)]
pub enum RollbackFailure {
    #[error("backup file is missing: {}", .path.display())]
    BackupMissing { path: PathBuf },
    #[error("rollback could not {step}: {source:#}")]
    Step {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl RollbackFailure {
    pub fn step(step: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Step {
            step,
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("version check failed: {0:#}")]
    VersionCheck(anyhow::Error),
    #[error(transparent)]
    Detection(#[from] DetectionReport),
    #[error("update attempt aborted before any change: {0}")]
    Aborted(PhaseFailure),
    #[error("update to {target} failed ({failure}); rolled back to {restored_version}, backup kept at {}", .backup_path.display())]
    RolledBack {
        target: String,
        failure: PhaseFailure,
        restored_version: String,
        backup_path: PathBuf,
    },
    #[error("update failed ({failure}) and rollback failed ({rollback}); manual recovery required")]
    Critical {
        failure: PhaseFailure,
        rollback: RollbackFailure,
        recovery: String,
    },
}

impl UpdateError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::VersionCheck(_) | Self::Detection(_) | Self::Aborted(_) => {
                FailureClass::Transient
            }
            Self::RolledBack { .. } => FailureClass::RolledBack,
            Self::Critical { .. } => FailureClass::Critical,
        }
    }
}

/// Literal steps an operator runs to put the previous binary back.
pub fn recovery_instructions(service_name: &str, backup_path: &Path, binary_path: &Path) -> String {
    let backup = backup_path.display();
    let binary = binary_path.display();
    let mut out = String::new();
    let _ = writeln!(out, "RECOVERY INSTRUCTIONS:");
    if cfg!(windows) {
        let _ = writeln!(out, "  1. Restore the binary: copy /Y \"{backup}\" \"{binary}\"");
        let _ = writeln!(
            out,
            "  2. Reinstall the service: sc create {service_name} binPath= \"{binary}\" start= auto"
        );
        let _ = writeln!(out, "  3. Start the service: sc start {service_name}");
    } else {
        let _ = writeln!(
            out,
            "  1. Restore the binary: cp \"{backup}\" \"{binary}\" && chmod 0755 \"{binary}\""
        );
        let _ = writeln!(
            out,
            "  2. Reinstall the service {service_name} so it runs \"{binary}\""
        );
        if cfg!(target_os = "macos") {
            let _ = writeln!(
                out,
                "  3. Start the service: launchctl load /Library/LaunchDaemons/{service_name}.plist"
            );
        } else {
            let _ = writeln!(
                out,
                "  3. Start the service: systemctl daemon-reload && systemctl enable --now {service_name}"
            );
        }
    }
    let _ = write!(out, "Backup file: {backup}");
    out
}
