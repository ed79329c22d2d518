use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Subset of the module metadata printed by `go list -m -json` and served
/// by a module proxy's `@latest` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleInfo {
    #[serde(rename = "Path", default)]
    pub path: Option<String>,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Time", default)]
    pub time: Option<String>,
}

pub fn parse_module_info(raw: &str, module: &str) -> Result<ModuleInfo> {
    let info: ModuleInfo = serde_json::from_str(raw).with_context(|| {
        format!("version-query-failed: module '{module}' returned malformed metadata")
    })?;
    if info.version.trim().is_empty() {
        return Err(anyhow!(
            "version-query-failed: module '{module}' metadata has no Version"
        ));
    }
    Ok(info)
}

/// Module proxies are case-insensitive; uppercase letters are encoded as
/// `!` followed by the lowercase letter.
pub fn escape_module_path(module: &str) -> String {
    let mut escaped = String::with_capacity(module.len());
    for ch in module.chars() {
        if ch.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(ch.to_ascii_lowercase());
        } else {
            escaped.push(ch);
        }
    }
    escaped
}
