use anyhow::{anyhow, Result};
use tracing::warn;

/// Pulls the version identifier out of the managed binary's version report,
/// e.g. `"SentinelGo v1.6.116 (linux/amd64)"` yields `"v1.6.116"`.
///
/// The first whitespace-separated token shaped like `v<digit>...` wins. When
/// no such token exists the trimmed output is returned unchanged so the
/// comparison can still run against whatever the binary printed.
pub fn extract_version_token(output: &str) -> Result<String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("binary returned an empty version report"));
    }

    let token = trimmed.split_whitespace().find(|part| {
        let mut chars = part.chars();
        chars.next() == Some('v') && chars.next().is_some_and(|ch| ch.is_ascii_digit())
    });

    match token {
        Some(token) => Ok(token.to_string()),
        None => {
            warn!(output = trimmed, "could not extract a version token from output");
            Ok(trimmed.to_string())
        }
    }
}

/// Returns true when `latest` is strictly newer than `current`.
pub fn is_newer(current: &str, latest: &str) -> bool {
    let current = current.trim().trim_start_matches('v');
    let latest = latest.trim().trim_start_matches('v');
    if current == latest {
        return false;
    }

    let current = version_triple(current);
    let latest = version_triple(latest);
    for (current_part, latest_part) in current.iter().zip(latest.iter()) {
        if latest_part > current_part {
            return true;
        }
        if latest_part < current_part {
            return false;
        }
    }
    false
}

/// Parses `major.minor.patch`, reading only the leading digits of each
/// segment. Missing or non-numeric segments count as zero, so `"1.6"` is
/// `[1, 6, 0]` and `"1.7.0-rc1"` is `[1, 7, 0]`.
pub fn version_triple(version: &str) -> [u64; 3] {
    let mut parts = [0_u64; 3];
    for (slot, segment) in parts.iter_mut().zip(version.split('.')) {
        let digits: String = segment
            .trim()
            .chars()
            .take_while(|ch| ch.is_ascii_digit())
            .collect();
        *slot = digits.parse().unwrap_or(0);
    }
    parts
}
