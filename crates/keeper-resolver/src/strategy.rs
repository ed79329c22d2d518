use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use keeper_core::{AgentDescriptor, DetectionMethod};
use keeper_service::ServiceSupervisor;
use sysinfo::System;

use crate::{validate_binary, Platform, SearchEnvironment};

/// One way of locating the managed binary. `detect` returns a candidate;
/// the resolver validates it before trusting it.
pub trait DetectionStrategy: Send + Sync {
    fn method(&self) -> DetectionMethod;

    fn detect(&self) -> Result<PathBuf>;

    fn searched_locations(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

pub struct ServiceConfigStrategy {
    supervisor: Arc<dyn ServiceSupervisor>,
    service_name: String,
}

impl ServiceConfigStrategy {
    pub fn new(supervisor: Arc<dyn ServiceSupervisor>, service_name: &str) -> Self {
        Self {
            supervisor,
            service_name: service_name.to_string(),
        }
    }
}

impl DetectionStrategy for ServiceConfigStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::ServiceConfig
    }

    fn detect(&self) -> Result<PathBuf> {
        Ok(self.supervisor.service_binary_path(&self.service_name)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub executable: PathBuf,
}

pub trait ProcessTable: Send + Sync {
    fn processes(&self) -> Vec<ProcessEntry>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessTable;

impl ProcessTable for SysinfoProcessTable {
    fn processes(&self) -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes();
        system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                process.exe().map(|exe| ProcessEntry {
                    pid: pid.as_u32(),
                    executable: strip_deleted_suffix(exe),
                })
            })
            .collect()
    }
}

// Linux reports a replaced executable as "/path/bin (deleted)".
fn strip_deleted_suffix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_suffix(" (deleted)") {
        Some(trimmed) => PathBuf::from(trimmed),
        None => path.to_path_buf(),
    }
}

pub struct RunningProcessStrategy {
    table: Box<dyn ProcessTable>,
    executable: String,
    platform: Platform,
}

impl RunningProcessStrategy {
    pub fn new(table: Box<dyn ProcessTable>, executable: &str, platform: Platform) -> Self {
        Self {
            table,
            executable: executable.to_string(),
            platform,
        }
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().map(|name| name.to_string_lossy()) else {
            return false;
        };
        if self.platform == Platform::Windows {
            file_name.eq_ignore_ascii_case(&self.executable)
        } else {
            file_name == self.executable.as_str()
        }
    }
}

impl DetectionStrategy for RunningProcessStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::RunningProcess
    }

    fn detect(&self) -> Result<PathBuf> {
        let mut matching: Vec<ProcessEntry> = self
            .table
            .processes()
            .into_iter()
            .filter(|entry| self.matches(&entry.executable))
            .collect();
        matching.sort_by_key(|entry| entry.pid);
        matching
            .into_iter()
            .next()
            .map(|entry| entry.executable)
            .ok_or_else(|| anyhow!("no running process named '{}'", self.executable))
    }
}

pub struct PathSearchStrategy {
    executable: String,
    dirs: Vec<PathBuf>,
    platform: Platform,
}

impl PathSearchStrategy {
    pub fn new(executable: &str, dirs: Vec<PathBuf>, platform: Platform) -> Self {
        Self {
            executable: executable.to_string(),
            dirs,
            platform,
        }
    }
}

impl DetectionStrategy for PathSearchStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::PathSearch
    }

    fn detect(&self) -> Result<PathBuf> {
        if self.dirs.is_empty() {
            return Err(anyhow!("PATH environment variable is empty or not set"));
        }
        let candidates = self.dirs.iter().map(|dir| dir.join(&self.executable));
        first_candidate(candidates, self.platform).ok_or_else(|| {
            anyhow!(
                "binary '{}' not found in PATH (searched {} directories)",
                self.executable,
                self.dirs.len()
            )
        })
    }

    fn searched_locations(&self) -> Vec<PathBuf> {
        self.dirs.clone()
    }
}

pub struct CommonPathsStrategy {
    paths: Vec<PathBuf>,
    platform: Platform,
}

impl CommonPathsStrategy {
    pub fn new(paths: Vec<PathBuf>, platform: Platform) -> Self {
        Self { paths, platform }
    }
}

impl DetectionStrategy for CommonPathsStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::CommonPaths
    }

    fn detect(&self) -> Result<PathBuf> {
        first_candidate(self.paths.iter().cloned(), self.platform).ok_or_else(|| {
            anyhow!(
                "binary not found in {} common installation paths",
                self.paths.len()
            )
        })
    }

    fn searched_locations(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }
}

/// Prefers the first candidate that validates; otherwise hands back the
/// first regular file so the resolver can report why it was rejected.
fn first_candidate(
    candidates: impl Iterator<Item = PathBuf>,
    platform: Platform,
) -> Option<PathBuf> {
    let mut fallback = None;
    for candidate in candidates {
        if validate_binary(&candidate, platform).is_ok() {
            return Some(candidate);
        }
        if fallback.is_none() && candidate.is_file() {
            fallback = Some(candidate);
        }
    }
    fallback
}

pub fn common_paths(
    agent: &AgentDescriptor,
    env: &SearchEnvironment,
    platform: Platform,
) -> Vec<PathBuf> {
    let executable = platform.executable_name(&agent.binary_name);
    let mut paths = Vec::new();
    match platform {
        Platform::Linux | Platform::MacOs => {
            paths.push(PathBuf::from("/usr/local/bin").join(&executable));
            paths.push(PathBuf::from("/usr/bin").join(&executable));
            paths.push(
                PathBuf::from("/opt")
                    .join(&agent.service_name)
                    .join(&executable),
            );
            if let Some(home) = &env.home {
                paths.push(home.join("go").join("bin").join(&executable));
                if platform == Platform::Linux {
                    paths.push(home.join(".local").join("bin").join(&executable));
                }
            }
            if platform == Platform::MacOs {
                paths.push(
                    PathBuf::from("/Applications")
                        .join(&agent.display_name)
                        .join(&executable),
                );
            }
        }
        Platform::Windows => {
            for root in [&env.program_files, &env.program_files_x86]
                .into_iter()
                .flatten()
            {
                paths.push(root.join(&agent.display_name).join(&executable));
            }
            if let Some(profile) = &env.user_profile {
                paths.push(profile.join("go").join("bin").join(&executable));
            }
            paths.push(
                PathBuf::from(format!("C:\\{}", agent.display_name)).join(&executable),
            );
        }
    }
    paths
}

pub fn default_strategies(
    agent: &AgentDescriptor,
    supervisor: Arc<dyn ServiceSupervisor>,
    env: &SearchEnvironment,
    platform: Platform,
) -> Vec<Box<dyn DetectionStrategy>> {
    let executable = platform.executable_name(&agent.binary_name);
    vec![
        Box::new(ServiceConfigStrategy::new(supervisor, &agent.service_name)),
        Box::new(RunningProcessStrategy::new(
            Box::new(SysinfoProcessTable),
            &executable,
            platform,
        )),
        Box::new(PathSearchStrategy::new(
            &executable,
            env.path_dirs.clone(),
            platform,
        )),
        Box::new(CommonPathsStrategy::new(
            common_paths(agent, env, platform),
            platform,
        )),
    ]
}
