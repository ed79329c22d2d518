use std::fs;
use std::io;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::Platform;

/// A usable binary exists, is not a directory, and on Unix-like platforms
/// carries at least one execute bit.
pub fn validate_binary(path: &Path, platform: Platform) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("path is empty"));
    }

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(anyhow!("file does not exist"));
        }
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            return Err(anyhow!("permission denied accessing file"));
        }
        Err(err) => return Err(anyhow!("failed to stat file: {err}")),
    };

    if metadata.is_dir() {
        return Err(anyhow!("path is a directory, not a file"));
    }

    if platform.checks_executable_bit() && !has_execute_bit(&metadata) {
        return Err(anyhow!(
            "file is not executable (missing execute permissions)"
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn has_execute_bit(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_execute_bit(_metadata: &fs::Metadata) -> bool {
    true
}
