use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const BACKUP_SUFFIX: &str = ".backup";
const LEGACY_BACKUP_SUFFIX: &str = ".old";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ManualConfiguration,
    ServiceConfig,
    RunningProcess,
    PathSearch,
    CommonPaths,
}

impl DetectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManualConfiguration => "manual_configuration",
            Self::ServiceConfig => "service_config",
            Self::RunningProcess => "running_process",
            Self::PathSearch => "path_search",
            Self::CommonPaths => "common_paths",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ManualConfiguration => "Manual configuration override",
            Self::ServiceConfig => "System service configuration",
            Self::RunningProcess => "Running process detection",
            Self::PathSearch => "PATH environment variable",
            Self::CommonPaths => "Common installation directories",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one update attempt needs to know about the installation it is
/// mutating, fixed before the first mutation. Fields are read-only; the
/// backup path is derived here and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateContext {
    binary_path: PathBuf,
    binary_dir: PathBuf,
    backup_path: PathBuf,
    current_version: String,
    target_version: String,
    started_at: DateTime<Utc>,
    detection_method: DetectionMethod,
}

impl UpdateContext {
    pub fn new(
        binary_path: impl Into<PathBuf>,
        detection_method: DetectionMethod,
        current_version: impl Into<String>,
        target_version: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let binary_path = binary_path.into();
        let binary_dir = binary_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let backup_path = backup_path_for(&binary_path);
        Self {
            binary_path,
            binary_dir,
            backup_path,
            current_version: current_version.into(),
            target_version: target_version.into(),
            started_at,
            detection_method,
        }
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn binary_dir(&self) -> &Path {
        &self.binary_dir
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn legacy_backup_path(&self) -> PathBuf {
        legacy_backup_path_for(&self.binary_path)
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn target_version(&self) -> &str {
        &self.target_version
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn detection_method(&self) -> DetectionMethod {
        self.detection_method
    }
}

pub fn backup_path_for(binary_path: &Path) -> PathBuf {
    with_suffix(binary_path, BACKUP_SUFFIX)
}

pub fn legacy_backup_path_for(binary_path: &Path) -> PathBuf {
    with_suffix(binary_path, LEGACY_BACKUP_SUFFIX)
}

/// Appends to the full file name; `Path::with_extension` would replace
/// `.exe` on Windows binaries.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
