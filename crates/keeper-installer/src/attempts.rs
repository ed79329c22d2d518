use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use keeper_core::UpdateContext;
use thiserror::Error;
use tracing::{error, warn};

use crate::fs_utils::remove_file_if_exists;
use crate::{AttemptJournalEntry, AttemptMetadata, AttemptStatus, StateLayout};

const METADATA_VERSION: u32 = 1;

/// Finished attempts kept on disk; older ones are pruned when an attempt ends.
pub const RETAINED_ATTEMPTS: usize = 20;

static ATTEMPT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Another process holds the active-attempt marker.
#[derive(Debug, Clone, Error)]
#[error("another update attempt is in progress (attempt={attempt_id}, marker={})", .marker.display())]
pub struct AttemptInProgress {
    pub attempt_id: String,
    pub marker: PathBuf,
}

pub fn set_active_attempt(layout: &StateLayout, attempt_id: &str) -> Result<PathBuf> {
    let path = layout.attempt_active_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let existing = read_active_attempt(layout).ok().flatten();
            return Err(AttemptInProgress {
                attempt_id: existing.unwrap_or_else(|| "unknown".to_string()),
                marker: path,
            }
            .into());
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to claim active attempt file: {}", path.display())
            });
        }
    };

    file.write_all(format!("{attempt_id}\n").as_bytes())
        .with_context(|| format!("failed to write active attempt file: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush active attempt file: {}", path.display()))?;

    Ok(path)
}

pub fn read_active_attempt(layout: &StateLayout) -> Result<Option<String>> {
    let path = layout.attempt_active_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read active attempt file: {}", path.display())
            });
        }
    };

    let attempt_id = raw.trim();
    if attempt_id.is_empty() {
        return Ok(None);
    }
    Ok(Some(attempt_id.to_string()))
}

pub fn clear_active_attempt(layout: &StateLayout) -> Result<()> {
    let path = layout.attempt_active_path();
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err)
            .with_context(|| format!("failed to clear active attempt file: {}", path.display())),
    }
}

pub fn write_attempt_metadata(layout: &StateLayout, metadata: &AttemptMetadata) -> Result<PathBuf> {
    let path = layout.attempt_metadata_path(&metadata.attempt_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(metadata)
        .context("failed to serialize attempt metadata")?;
    fs::write(&path, raw)
        .with_context(|| format!("failed to write attempt metadata file: {}", path.display()))?;
    Ok(path)
}

pub fn read_attempt_metadata(
    layout: &StateLayout,
    attempt_id: &str,
) -> Result<Option<AttemptMetadata>> {
    let path = layout.attempt_metadata_path(attempt_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read attempt metadata file: {}", path.display())
            });
        }
    };

    let metadata = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing attempt metadata file: {}", path.display()))?;
    Ok(Some(metadata))
}

pub fn update_attempt_status(
    layout: &StateLayout,
    attempt_id: &str,
    status: AttemptStatus,
) -> Result<()> {
    let mut metadata = read_attempt_metadata(layout, attempt_id)?
        .ok_or_else(|| anyhow!("attempt metadata not found for '{attempt_id}'"))?;
    metadata.status = status;
    if status != AttemptStatus::Running {
        metadata.finished_at = Some(Utc::now());
    }
    write_attempt_metadata(layout, &metadata)?;
    Ok(())
}

pub fn append_attempt_journal_entry(
    layout: &StateLayout,
    attempt_id: &str,
    entry: &AttemptJournalEntry,
) -> Result<PathBuf> {
    let path = layout.attempt_journal_path(attempt_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut line =
        serde_json::to_string(entry).context("failed to serialize attempt journal entry")?;
    line.push('\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open attempt journal: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append attempt journal: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush attempt journal: {}", path.display()))?;
    Ok(path)
}

pub fn read_attempt_journal(
    layout: &StateLayout,
    attempt_id: &str,
) -> Result<Vec<AttemptJournalEntry>> {
    let path = layout.attempt_journal_path(attempt_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read attempt journal: {}", path.display()));
        }
    };

    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| {
                format!(
                    "failed parsing attempt journal line {}: {}",
                    index + 1,
                    path.display()
                )
            })
        })
        .collect()
}

/// Every recorded attempt, oldest first.
pub fn list_attempts(layout: &StateLayout) -> Result<Vec<AttemptMetadata>> {
    let dir = layout.attempts_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to list attempts in {}", dir.display()));
        }
    };

    let mut attempts = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", dir.display()))?
            .path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(attempt_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if let Some(metadata) = read_attempt_metadata(layout, attempt_id)? {
            attempts.push(metadata);
        }
    }
    attempts.sort_by(|left, right| {
        left.started_at
            .cmp(&right.started_at)
            .then_with(|| left.attempt_id.cmp(&right.attempt_id))
    });
    Ok(attempts)
}

pub fn attempt_id_for(ctx: &UpdateContext) -> String {
    format!(
        "attempt-{}-{}-{}",
        ctx.started_at().timestamp_millis(),
        std::process::id(),
        ATTEMPT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Deletes the metadata and journal of the oldest finished attempts beyond
/// `keep`. Running attempts are never touched. Returns how many were removed.
pub fn prune_finished_attempts(layout: &StateLayout, keep: usize) -> Result<usize> {
    let finished: Vec<AttemptMetadata> = list_attempts(layout)?
        .into_iter()
        .filter(|attempt| attempt.status != AttemptStatus::Running)
        .collect();
    let excess = finished.len().saturating_sub(keep);
    for attempt in &finished[..excess] {
        for path in [
            layout.attempt_journal_path(&attempt.attempt_id),
            layout.attempt_metadata_path(&attempt.attempt_id),
        ] {
            remove_file_if_exists(&path)
                .with_context(|| format!("failed to prune attempt file {}", path.display()))?;
        }
    }
    Ok(excess)
}

/// Bookkeeping for one update attempt. Once begun, write failures are
/// logged and never fail the attempt itself.
#[derive(Debug)]
pub struct AttemptJournal {
    layout: Option<StateLayout>,
    attempt_id: String,
    seq: u64,
}

impl AttemptJournal {
    /// Claims the active marker and writes the initial metadata. Fails with
    /// [`AttemptInProgress`] if the marker is already held.
    pub fn begin(layout: &StateLayout, ctx: &UpdateContext) -> Result<Self> {
        let attempt_id = attempt_id_for(ctx);
        set_active_attempt(layout, &attempt_id)?;

        let metadata = AttemptMetadata {
            version: METADATA_VERSION,
            attempt_id: attempt_id.clone(),
            from_version: ctx.current_version().to_string(),
            to_version: ctx.target_version().to_string(),
            binary_path: ctx.binary_path().to_path_buf(),
            backup_path: ctx.backup_path().to_path_buf(),
            detection_method: ctx.detection_method().to_string(),
            status: AttemptStatus::Running,
            started_at: ctx.started_at(),
            finished_at: None,
        };
        if let Err(err) = write_attempt_metadata(layout, &metadata) {
            let _ = clear_active_attempt(layout);
            return Err(err);
        }

        Ok(Self {
            layout: Some(layout.clone()),
            attempt_id,
            seq: 0,
        })
    }

    pub fn disabled(ctx: &UpdateContext) -> Self {
        Self {
            layout: None,
            attempt_id: attempt_id_for(ctx),
            seq: 0,
        }
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn record(&mut self, phase: &str, state: &str, detail: Option<&str>) {
        self.seq += 1;
        let Some(layout) = &self.layout else {
            return;
        };
        let entry = AttemptJournalEntry {
            seq: self.seq,
            phase: phase.to_string(),
            state: state.to_string(),
            at: Utc::now(),
            detail: detail.map(str::to_string),
        };
        if let Err(err) = append_attempt_journal_entry(layout, &self.attempt_id, &entry) {
            warn!(attempt = %self.attempt_id, phase, error = %format!("{err:#}"), "failed to append attempt journal");
        }
    }

    pub fn finish(self, status: AttemptStatus) {
        let Some(layout) = &self.layout else {
            return;
        };
        if let Err(err) = update_attempt_status(layout, &self.attempt_id, status) {
            warn!(attempt = %self.attempt_id, status = %status, error = %format!("{err:#}"), "failed to record attempt status");
        }
        if let Err(err) = clear_active_attempt(layout) {
            warn!(attempt = %self.attempt_id, error = %format!("{err:#}"), "failed to clear active attempt marker");
        }
        if let Err(err) = prune_finished_attempts(layout, RETAINED_ATTEMPTS) {
            warn!(error = %format!("{err:#}"), "failed to prune old update attempts");
        }
    }
}

/// A marker left behind means the previous process died mid-attempt. The
/// attempt is marked interrupted and the marker cleared so updates resume.
pub fn recover_interrupted_attempt(layout: &StateLayout) -> Result<Option<AttemptMetadata>> {
    let Some(attempt_id) = read_active_attempt(layout)? else {
        if layout.attempt_active_path().exists() {
            clear_active_attempt(layout)?;
        }
        return Ok(None);
    };

    let metadata = read_attempt_metadata(layout, &attempt_id)?;
    match &metadata {
        Some(metadata) => {
            error!(
                attempt = %attempt_id,
                from = %metadata.from_version,
                to = %metadata.to_version,
                binary = %metadata.binary_path.display(),
                backup = %metadata.backup_path.display(),
                "previous update attempt was interrupted; if the agent is not running, restore it from the backup and reinstall the service"
            );
            if metadata.status == AttemptStatus::Running {
                update_attempt_status(layout, &attempt_id, AttemptStatus::Interrupted)?;
            }
        }
        None => {
            warn!(attempt = %attempt_id, "active attempt marker has no metadata; clearing it");
        }
    }

    clear_active_attempt(layout)?;
    Ok(metadata.map(|mut metadata| {
        if metadata.status == AttemptStatus::Running {
            metadata.status = AttemptStatus::Interrupted;
        }
        metadata
    }))
}
