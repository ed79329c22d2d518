use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use keeper_core::{AgentDescriptor, DetectionMethod, ManualOverride};
use keeper_service::ServiceSupervisor;
use tracing::{debug, error, info, warn};

use crate::{
    default_strategies, validate_binary, DetectionReport, DetectionStrategy, PathCache, Platform,
    SearchEnvironment, StrategyFailure,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    pub path: PathBuf,
    pub method: DetectionMethod,
}

/// Finds the managed binary: cache, then the manual override, then each
/// strategy in order until one yields a path that validates.
pub struct BinaryResolver {
    agent: AgentDescriptor,
    platform: Platform,
    cache: Arc<PathCache>,
    strategies: Vec<Box<dyn DetectionStrategy>>,
    manual_override: Option<ManualOverride>,
    override_file: PathBuf,
}

impl BinaryResolver {
    pub fn new(
        agent: AgentDescriptor,
        platform: Platform,
        cache: Arc<PathCache>,
        strategies: Vec<Box<dyn DetectionStrategy>>,
        override_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            agent,
            platform,
            cache,
            strategies,
            manual_override: None,
            override_file: override_file.into(),
        }
    }

    pub fn for_host(
        agent: AgentDescriptor,
        cache: Arc<PathCache>,
        supervisor: Arc<dyn ServiceSupervisor>,
        override_file: impl Into<PathBuf>,
    ) -> Self {
        let platform = Platform::current();
        let env = SearchEnvironment::from_process();
        let strategies = default_strategies(&agent, supervisor, &env, platform);
        Self::new(agent, platform, cache, strategies, override_file)
    }

    pub fn with_manual_override(mut self, manual_override: Option<ManualOverride>) -> Self {
        if let Some(manual) = &manual_override {
            if !manual.enable_auto_detection && manual.binary_path.is_some() {
                info!("auto-detection is disabled; a failing override still falls back to detection");
            }
        }
        self.manual_override = manual_override;
        self
    }

    pub fn cache(&self) -> &Arc<PathCache> {
        &self.cache
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn override_file(&self) -> &Path {
        &self.override_file
    }

    pub fn invalidate(&self) {
        if let Some(stale) = self.cache.invalidate() {
            debug!(path = %stale.path.display(), "invalidated cached binary path");
        }
    }

    pub fn validate(&self, path: &Path) -> anyhow::Result<()> {
        validate_binary(path, self.platform)
    }

    pub fn resolve(&self) -> Result<ResolvedBinary, DetectionReport> {
        if let Some(cached) = self.cache.get() {
            match validate_binary(&cached.path, self.platform) {
                Ok(()) => {
                    return Ok(ResolvedBinary {
                        path: cached.path,
                        method: cached.method,
                    });
                }
                Err(err) => {
                    warn!(
                        path = %cached.path.display(),
                        reason = %err,
                        "cached binary path is no longer valid; re-running detection"
                    );
                    self.cache.invalidate();
                }
            }
        }

        if let Some(path) = self
            .manual_override
            .as_ref()
            .and_then(|manual| manual.binary_path.as_ref())
        {
            match validate_binary(path, self.platform) {
                Ok(()) => {
                    info!(path = %path.display(), "using manually configured binary path");
                    return Ok(self.remember(path.clone(), DetectionMethod::ManualConfiguration));
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        file = %self.override_file.display(),
                        reason = %err,
                        "manually configured binary path is invalid; falling back to auto-detection"
                    );
                }
            }
        }

        let mut failures = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let method = strategy.method();
            let failure = match strategy.detect() {
                Ok(candidate) => match validate_binary(&candidate, self.platform) {
                    Ok(()) => {
                        info!(
                            path = %candidate.display(),
                            method = %method,
                            "detected managed binary"
                        );
                        return Ok(self.remember(candidate, method));
                    }
                    Err(err) => StrategyFailure {
                        method,
                        reason: format!("invalid binary: {err}"),
                        path_found: Some(candidate),
                        searched: strategy.searched_locations(),
                    },
                },
                Err(err) => StrategyFailure {
                    method,
                    reason: format!("{err:#}"),
                    path_found: None,
                    searched: strategy.searched_locations(),
                },
            };
            debug!(method = %method, reason = %failure.reason, "detection strategy failed");
            failures.push(failure);
        }

        let report = DetectionReport {
            platform: self.platform,
            arch: std::env::consts::ARCH,
            generated_at: Utc::now(),
            executable: self.platform.executable_name(&self.agent.binary_name),
            service_name: self.agent.service_name.clone(),
            install_target: self.agent.install_target("latest"),
            override_file: self.override_file.clone(),
            failures,
        };
        error!(report = %report.render(), "{report}");
        Err(report)
    }

    fn remember(&self, path: PathBuf, method: DetectionMethod) -> ResolvedBinary {
        self.cache.store(path.clone(), method);
        ResolvedBinary { path, method }
    }
}
