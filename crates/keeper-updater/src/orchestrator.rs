use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use keeper_core::{is_newer, AgentDescriptor, DetectionMethod, UpdateContext};
use keeper_installer::{
    cleanup_previous_binary, discard_backup, install_binary, restore_binary, snapshot_binary,
    AttemptInProgress, AttemptJournal, AttemptStatus, BackupRecord, BuildToolchain, StateLayout,
};
use keeper_registry::VersionSource;
use keeper_resolver::BinaryResolver;
use keeper_service::{ServiceError, ServiceSupervisor};
use tracing::{debug, error, info, warn};

use crate::{
    recovery_instructions, Phase, PhaseFailure, RetryPolicy, RollbackFailure, Sleeper,
    UpdateError, VersionReader,
};

/// Everything the orchestrator talks to. Built once by the process root.
pub struct Collaborators {
    pub agent: AgentDescriptor,
    pub resolver: BinaryResolver,
    pub supervisor: Arc<dyn ServiceSupervisor>,
    pub versions: Box<dyn VersionSource>,
    pub reader: Box<dyn VersionReader>,
    pub toolchain: Box<dyn BuildToolchain>,
    pub layout: StateLayout,
    pub verify_policy: RetryPolicy,
    pub sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStatus {
    pub binary_path: PathBuf,
    pub method: DetectionMethod,
    pub current: String,
    pub latest: String,
}

impl VersionStatus {
    pub fn update_available(&self) -> bool {
        is_newer(&self.current, &self.latest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { version: String },
    Updated {
        from: String,
        to: String,
        binary_path: PathBuf,
    },
}

/// Runs one update attempt at a time: back up, replace, re-register, verify,
/// and restore the backup if anything after the backup fails.
pub struct Orchestrator {
    agent: AgentDescriptor,
    resolver: BinaryResolver,
    supervisor: Arc<dyn ServiceSupervisor>,
    versions: Box<dyn VersionSource>,
    reader: Box<dyn VersionReader>,
    toolchain: Box<dyn BuildToolchain>,
    layout: StateLayout,
    verify_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Orchestrator {
    pub fn new(parts: Collaborators) -> Self {
        Self {
            agent: parts.agent,
            resolver: parts.resolver,
            supervisor: parts.supervisor,
            versions: parts.versions,
            reader: parts.reader,
            toolchain: parts.toolchain,
            layout: parts.layout,
            verify_policy: parts.verify_policy,
            sleeper: parts.sleeper,
        }
    }

    pub fn resolver(&self) -> &BinaryResolver {
        &self.resolver
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn check_version(&self) -> Result<VersionStatus, UpdateError> {
        debug!(phase = %Phase::CheckVersion, "checking installed and published versions");
        let resolved = self.resolver.resolve()?;
        let current = match self.reader.installed_version(&resolved.path) {
            Ok(current) => current,
            Err(err) => {
                // A binary that cannot report its version may be gone or corrupt.
                self.resolver.invalidate();
                return Err(UpdateError::VersionCheck(err));
            }
        };
        let latest = self
            .versions
            .latest(&self.agent.module)
            .map_err(UpdateError::VersionCheck)?;
        Ok(VersionStatus {
            binary_path: resolved.path,
            method: resolved.method,
            current,
            latest,
        })
    }

    pub fn check_and_update(&mut self) -> Result<UpdateOutcome, UpdateError> {
        let status = self.check_version()?;
        if !status.update_available() {
            info!(
                current = %status.current,
                latest = %status.latest,
                "agent is up to date"
            );
            return Ok(UpdateOutcome::UpToDate {
                version: status.current,
            });
        }
        info!(
            current = %status.current,
            latest = %status.latest,
            binary = %status.binary_path.display(),
            "update available"
        );

        let ctx = self.build_context(&status)?;
        let mut journal = self.open_journal(&ctx)?;
        info!(attempt = %journal.attempt_id(), "update attempt started");

        journal.record(Phase::Backup.as_str(), "started", None);
        let record = match snapshot_binary(&ctx) {
            Ok(record) => record,
            Err(err) => {
                journal.record(Phase::Backup.as_str(), "failed", Some(format!("{err:#}").as_str()));
                journal.finish(AttemptStatus::Aborted);
                return Err(UpdateError::Aborted(PhaseFailure::new(Phase::Backup, err)));
            }
        };
        journal.record(Phase::Backup.as_str(), "done", None);

        match self.run_forward(&ctx, &record, &mut journal) {
            Ok(()) => {
                if let Err(err) = discard_backup(&record) {
                    warn!(backup = %record.backup_path.display(), error = %format!("{err:#}"), "failed to delete backup after successful update");
                }
                journal.finish(AttemptStatus::Succeeded);
                info!(
                    from = %ctx.current_version(),
                    to = %ctx.target_version(),
                    binary = %ctx.binary_path().display(),
                    "update completed"
                );
                Ok(UpdateOutcome::Updated {
                    from: ctx.current_version().to_string(),
                    to: ctx.target_version().to_string(),
                    binary_path: ctx.binary_path().to_path_buf(),
                })
            }
            Err(failure) if failure.phase.requires_rollback() => {
                Err(self.roll_back(&ctx, &record, journal, failure))
            }
            Err(failure) => {
                journal.finish(AttemptStatus::Aborted);
                Err(UpdateError::Aborted(failure))
            }
        }
    }

    fn build_context(&self, status: &VersionStatus) -> Result<UpdateContext, UpdateError> {
        let resolved = self.resolver.resolve().map_err(|report| {
            UpdateError::Aborted(PhaseFailure::new(Phase::BuildContext, report))
        })?;
        let ctx = UpdateContext::new(
            resolved.path,
            resolved.method,
            status.current.clone(),
            status.latest.clone(),
            Utc::now(),
        );
        info!(
            binary = %ctx.binary_path().display(),
            backup = %ctx.backup_path().display(),
            method = %ctx.detection_method(),
            "built update context"
        );
        Ok(ctx)
    }

    fn open_journal(&self, ctx: &UpdateContext) -> Result<AttemptJournal, UpdateError> {
        match AttemptJournal::begin(&self.layout, ctx) {
            Ok(journal) => Ok(journal),
            Err(err) if err.downcast_ref::<AttemptInProgress>().is_some() => Err(
                UpdateError::Aborted(PhaseFailure::new(Phase::BuildContext, err)),
            ),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "attempt journal unavailable; continuing without it");
                Ok(AttemptJournal::disabled(ctx))
            }
        }
    }

    fn run_forward(
        &self,
        ctx: &UpdateContext,
        record: &BackupRecord,
        journal: &mut AttemptJournal,
    ) -> Result<(), PhaseFailure> {
        let name = self.agent.service_name.as_str();

        self.phase(journal, Phase::StopService, || {
            tolerate_missing(self.supervisor.stop(name), name, "stop")
        })?;
        self.phase(journal, Phase::UninstallService, || {
            tolerate_missing(self.supervisor.uninstall(name), name, "uninstall")
        })?;
        self.phase(journal, Phase::Cleanup, || {
            cleanup_previous_binary(ctx);
            Ok(())
        })?;
        let built = self.phase(journal, Phase::Compile, || {
            self.toolchain.compile(&self.agent, ctx.target_version())
        })?;
        self.phase(journal, Phase::Install, || {
            let installed = install_binary(&built, ctx.binary_path(), record.owner);
            self.resolver.invalidate();
            installed
        })?;
        self.phase(journal, Phase::ReinstallService, || {
            let path = self.registration_path(ctx)?;
            self.supervisor.install(name, &path)?;
            Ok(())
        })?;
        self.phase(journal, Phase::StartService, || {
            self.supervisor.start(name)?;
            Ok(())
        })?;
        self.phase(journal, Phase::Verify, || self.verify_running())?;
        Ok(())
    }

    fn phase<T>(
        &self,
        journal: &mut AttemptJournal,
        phase: Phase,
        step: impl FnOnce() -> Result<T>,
    ) -> Result<T, PhaseFailure> {
        info!(phase = %phase, "starting phase");
        journal.record(phase.as_str(), "started", None);
        match step() {
            Ok(value) => {
                journal.record(phase.as_str(), "done", None);
                Ok(value)
            }
            Err(err) => {
                error!(phase = %phase, error = %format!("{err:#}"), "phase failed");
                journal.record(phase.as_str(), "failed", Some(format!("{err:#}").as_str()));
                Err(PhaseFailure::new(phase, err))
            }
        }
    }

    /// The service is registered at the context path. A re-resolved path is
    /// accepted only when it is the same file.
    fn registration_path(&self, ctx: &UpdateContext) -> Result<PathBuf> {
        self.resolver.invalidate();
        match self.resolver.resolve() {
            Ok(resolved) if same_file(&resolved.path, ctx.binary_path()) => {
                return Ok(ctx.binary_path().to_path_buf());
            }
            Ok(resolved) => {
                warn!(
                    resolved = %resolved.path.display(),
                    expected = %ctx.binary_path().display(),
                    "re-resolved binary differs from the one just installed; registering the installed path"
                );
                self.resolver.invalidate();
            }
            Err(report) => {
                warn!(error = %report, "could not re-resolve installed binary; registering the installed path");
            }
        }
        self.resolver
            .validate(ctx.binary_path())
            .with_context(|| format!("installed binary {} is not usable", ctx.binary_path().display()))?;
        Ok(ctx.binary_path().to_path_buf())
    }

    fn verify_running(&self) -> Result<()> {
        let name = self.agent.service_name.as_str();
        let attempt = self
            .verify_policy
            .poll(self.sleeper.as_ref(), |attempt| {
                info!(attempt, max_attempts = self.verify_policy.max_attempts, "checking service status");
                Ok(self.supervisor.is_running(name)?)
            })
            .with_context(|| format!("service '{name}' is not running"))?;
        info!(attempt, "service verified running");
        Ok(())
    }

    fn roll_back(
        &self,
        ctx: &UpdateContext,
        record: &BackupRecord,
        mut journal: AttemptJournal,
        failure: PhaseFailure,
    ) -> UpdateError {
        warn!(
            failed_phase = %failure.phase,
            restore_version = %record.version,
            backup = %record.backup_path.display(),
            "rolling back"
        );
        journal.record(Phase::Rollback.as_str(), "started", None);

        match self.restore_previous(record) {
            Ok(()) => {
                journal.record(Phase::Rollback.as_str(), "done", None);
                journal.finish(AttemptStatus::RolledBack);
                info!(
                    version = %record.version,
                    backup = %record.backup_path.display(),
                    "rollback completed; backup kept for inspection"
                );
                UpdateError::RolledBack {
                    target: ctx.target_version().to_string(),
                    failure,
                    restored_version: record.version.clone(),
                    backup_path: record.backup_path.clone(),
                }
            }
            Err(rollback) => {
                let recovery = recovery_instructions(
                    &self.agent.service_name,
                    &record.backup_path,
                    &record.original_path,
                );
                journal.record(
                    Phase::Rollback.as_str(),
                    "failed",
                    Some(rollback.to_string().as_str()),
                );
                journal.finish(AttemptStatus::Critical);
                error!(
                    failed_phase = %failure.phase,
                    rollback_error = %rollback,
                    backup = %record.backup_path.display(),
                    binary = %record.original_path.display(),
                    "rollback failed"
                );
                UpdateError::Critical {
                    failure,
                    rollback,
                    recovery,
                }
            }
        }
    }

    fn restore_previous(&self, record: &BackupRecord) -> Result<(), RollbackFailure> {
        if !record.backup_path.is_file() {
            return Err(RollbackFailure::BackupMissing {
                path: record.backup_path.clone(),
            });
        }
        let name = self.agent.service_name.as_str();

        // A half-started new build may still hold the file or the registration.
        for (action, outcome) in [
            ("stop", self.supervisor.stop(name)),
            ("uninstall", self.supervisor.uninstall(name)),
        ] {
            if let Err(err) = tolerate_missing(outcome, name, action) {
                warn!(action, error = %format!("{err:#}"), "rollback pre-step failed; continuing");
            }
        }

        restore_binary(record).map_err(|err| RollbackFailure::step("restore binary", err))?;
        self.resolver.invalidate();
        self.supervisor
            .install(name, &record.original_path)
            .map_err(|err| RollbackFailure::step("reinstall service", err))?;
        self.supervisor
            .start(name)
            .map_err(|err| RollbackFailure::step("start service", err))?;
        self.verify_running()
            .map_err(|err| RollbackFailure::step("verify service", err))?;
        Ok(())
    }
}

fn tolerate_missing(outcome: Result<(), ServiceError>, name: &str, action: &str) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_registered() => {
            info!(service = name, action, "service is not registered; nothing to do");
            Ok(())
        }
        Err(err) => Err(anyhow!(err)),
    }
}

fn same_file(left: &Path, right: &Path) -> bool {
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => left == right,
    }
}
