use std::fs;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use keeper_core::UpdateContext;
use keeper_security::{sha256_file_hex, verify_sha256_file};
use tracing::info;

use crate::fs_utils::remove_file_if_exists;
use crate::install::{file_owner, install_binary};
use crate::BackupRecord;

/// Copies the binary to `<binaryPath>.backup` and checks the copy is
/// byte-identical before anything else is touched.
pub fn snapshot_binary(ctx: &UpdateContext) -> Result<BackupRecord> {
    let source = ctx.binary_path();
    let backup = ctx.backup_path();

    let source_digest = sha256_file_hex(source)?;
    fs::copy(source, backup).with_context(|| {
        format!(
            "failed to copy {} to backup {}",
            source.display(),
            backup.display()
        )
    })?;

    let metadata = fs::metadata(backup)
        .with_context(|| format!("backup file was not created: {}", backup.display()))?;
    let backup_digest = sha256_file_hex(backup)?;
    if backup_digest != source_digest {
        let _ = remove_file_if_exists(backup);
        return Err(anyhow!(
            "backup digest mismatch for {}: expected {source_digest}, got {backup_digest}",
            backup.display()
        ));
    }

    let record = BackupRecord {
        version: ctx.current_version().to_string(),
        backup_path: backup.to_path_buf(),
        original_path: source.to_path_buf(),
        created_at: Utc::now(),
        size: metadata.len(),
        sha256: source_digest,
        owner: file_owner(source),
    };
    info!(
        backup = %record.backup_path.display(),
        version = %record.version,
        size = record.size,
        "created binary backup"
    );
    Ok(record)
}

/// Writes the backed-up bytes back to exactly `record.original_path`.
pub fn restore_binary(record: &BackupRecord) -> Result<()> {
    if !record.backup_path.is_file() {
        return Err(anyhow!(
            "backup file is missing: {}",
            record.backup_path.display()
        ));
    }
    if !verify_sha256_file(&record.backup_path, &record.sha256)? {
        return Err(anyhow!(
            "backup file {} does not match recorded sha256 {}",
            record.backup_path.display(),
            record.sha256
        ));
    }

    install_binary(&record.backup_path, &record.original_path, record.owner)
        .with_context(|| {
            format!(
                "failed to restore {} from {}",
                record.original_path.display(),
                record.backup_path.display()
            )
        })?;

    if !verify_sha256_file(&record.original_path, &record.sha256)? {
        return Err(anyhow!(
            "restored binary {} does not match backup digest",
            record.original_path.display()
        ));
    }
    info!(
        path = %record.original_path.display(),
        version = %record.version,
        "restored binary from backup"
    );
    Ok(())
}

pub fn discard_backup(record: &BackupRecord) -> Result<bool> {
    remove_file_if_exists(&record.backup_path)
        .with_context(|| format!("failed to remove backup {}", record.backup_path.display()))
}
