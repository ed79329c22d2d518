use std::fmt;

use thiserror::Error;

/// Steps of one update attempt, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CheckVersion,
    BuildContext,
    Backup,
    StopService,
    UninstallService,
    Cleanup,
    Compile,
    Install,
    ReinstallService,
    StartService,
    Verify,
    Rollback,
}

impl Phase {
    pub const FORWARD: [Phase; 8] = [
        Phase::StopService,
        Phase::UninstallService,
        Phase::Cleanup,
        Phase::Compile,
        Phase::Install,
        Phase::ReinstallService,
        Phase::StartService,
        Phase::Verify,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckVersion => "check_version",
            Self::BuildContext => "build_context",
            Self::Backup => "backup",
            Self::StopService => "stop_service",
            Self::UninstallService => "uninstall_service",
            Self::Cleanup => "cleanup",
            Self::Compile => "compile",
            Self::Install => "install",
            Self::ReinstallService => "reinstall_service",
            Self::StartService => "start_service",
            Self::Verify => "verify",
            Self::Rollback => "rollback",
        }
    }

    /// Phases after the backup exists and the service has been touched.
    pub fn requires_rollback(self) -> bool {
        Self::FORWARD.contains(&self)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{phase} failed: {source:#}")]
pub struct PhaseFailure {
    pub phase: Phase,
    #[source]
    pub source: anyhow::Error,
}

impl PhaseFailure {
    pub fn new(phase: Phase, source: impl Into<anyhow::Error>) -> Self {
        Self {
            phase,
            source: source.into(),
        }
    }
}
