use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use keeper_core::{with_suffix, UpdateContext};
use tracing::{debug, info, warn};

use crate::fs_utils::remove_file_if_exists;
use crate::FileOwner;

const STAGING_SUFFIX: &str = ".keeper-staging";

pub fn staging_path_for(target: &Path) -> PathBuf {
    with_suffix(target, STAGING_SUFFIX)
}

/// Replaces `target` with the bytes of `source` without ever exposing a
/// partial file: copy to a sibling, fix permissions, sync, rename.
pub fn install_binary(source: &Path, target: &Path, owner: Option<FileOwner>) -> Result<()> {
    if !source.is_file() {
        return Err(anyhow!(
            "install source is not a file: {}",
            source.display()
        ));
    }
    let staging = staging_path_for(target);
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    remove_file_if_exists(&staging)
        .with_context(|| format!("failed to remove stale staging file: {}", staging.display()))?;

    if let Err(err) = stage_and_swap(source, &staging, target, owner) {
        let _ = remove_file_if_exists(&staging);
        return Err(err);
    }

    ensure_executable(target)?;
    info!(source = %source.display(), target = %target.display(), "installed binary");
    Ok(())
}

fn stage_and_swap(
    source: &Path,
    staging: &Path,
    target: &Path,
    owner: Option<FileOwner>,
) -> Result<()> {
    fs::copy(source, staging).with_context(|| {
        format!(
            "failed to copy {} to staging file {}",
            source.display(),
            staging.display()
        )
    })?;
    set_executable_permissions(staging)?;
    if let Some(owner) = owner {
        apply_owner(staging, owner);
    }
    fs::File::open(staging)
        .and_then(|file| file.sync_all())
        .with_context(|| format!("failed to sync staging file: {}", staging.display()))?;
    fs::rename(staging, target).with_context(|| {
        format!(
            "failed to move staging file {} into place at {}",
            staging.display(),
            target.display()
        )
    })?;
    Ok(())
}

#[cfg(unix)]
fn set_executable_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_executable_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn apply_owner(path: &Path, owner: FileOwner) {
    if let Err(err) = std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid)) {
        warn!(
            path = %path.display(),
            uid = owner.uid,
            gid = owner.gid,
            error = %err,
            "failed to carry over binary ownership"
        );
    }
}

#[cfg(not(unix))]
fn apply_owner(_path: &Path, _owner: FileOwner) {}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)
        .with_context(|| format!("failed to stat installed binary: {}", path.display()))?
        .permissions()
        .mode();
    if mode & 0o111 == 0 {
        return Err(anyhow!(
            "installed binary is not executable: {} (mode {:o})",
            path.display(),
            mode & 0o777
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow!("installed binary is missing: {}", path.display()));
    }
    Ok(())
}

#[cfg(unix)]
pub fn file_owner(path: &Path) -> Option<FileOwner> {
    use std::os::unix::fs::MetadataExt;

    fs::metadata(path).ok().map(|metadata| FileOwner {
        uid: metadata.uid(),
        gid: metadata.gid(),
    })
}

#[cfg(not(unix))]
pub fn file_owner(_path: &Path) -> Option<FileOwner> {
    None
}

/// Removes the previous binary and the legacy `.old` copy. The backup is
/// never touched. Failures are warnings; returns what was removed.
pub fn cleanup_previous_binary(ctx: &UpdateContext) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for path in [ctx.binary_path().to_path_buf(), ctx.legacy_backup_path()] {
        if path == ctx.backup_path() {
            continue;
        }
        match remove_file_if_exists(&path) {
            Ok(true) => {
                debug!(path = %path.display(), "removed previous binary");
                removed.push(path);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to remove previous binary; continuing");
            }
        }
    }
    removed
}
