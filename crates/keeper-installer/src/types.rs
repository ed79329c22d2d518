use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric owner of a file, carried from the replaced binary to its
/// successor on Unix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwner {
    pub uid: u32,
    pub gid: u32,
}

/// Snapshot of the binary taken before any mutation. `original_path` is the
/// only place a rollback may restore to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub version: String,
    pub backup_path: PathBuf,
    pub original_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub sha256: String,
    pub owner: Option<FileOwner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Aborted,
    RolledBack,
    Critical,
    Interrupted,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Aborted => "aborted",
            Self::RolledBack => "rolled_back",
            Self::Critical => "critical",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptMetadata {
    pub version: u32,
    pub attempt_id: String,
    pub from_version: String,
    pub to_version: String,
    pub binary_path: PathBuf,
    pub backup_path: PathBuf,
    pub detection_method: String,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptJournalEntry {
    pub seq: u64,
    pub phase: String,
    pub state: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
