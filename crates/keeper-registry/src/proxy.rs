use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::{escape_module_path, parse_module_info, VersionSource};

pub struct ModuleProxyVersionSource {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl ModuleProxyVersionSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("agent-keeper/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build module proxy HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn latest_url(&self, module: &str) -> String {
        format!("{}/{}/@latest", self.base_url, escape_module_path(module))
    }
}

impl VersionSource for ModuleProxyVersionSource {
    fn latest(&self, module: &str) -> Result<String> {
        let url = self.latest_url(module);
        debug!(%url, "querying module proxy");
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("version-query-failed: request to {url} failed"))?;
        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("version-query-failed: failed reading body from {url}"))?;
        if !status.is_success() {
            anyhow::bail!(
                "version-query-failed: {url} returned {status}: {}",
                body.trim()
            );
        }

        let info = parse_module_info(&body, module)?;
        Ok(info.version)
    }
}
