mod go_list;
mod module_info;
mod proxy;

use anyhow::Result;
use keeper_core::{VersionSourceConfig, VersionSourceKind};

pub use go_list::GoListVersionSource;
pub use module_info::{escape_module_path, parse_module_info, ModuleInfo};
pub use proxy::ModuleProxyVersionSource;

/// Where the latest published version of the managed module comes from.
pub trait VersionSource: Send + Sync {
    fn latest(&self, module: &str) -> Result<String>;
}

pub fn version_source_from_config(config: &VersionSourceConfig) -> Result<Box<dyn VersionSource>> {
    match config.kind {
        VersionSourceKind::GoList => Ok(Box::new(
            GoListVersionSource::new()
                .with_timeout(std::time::Duration::from_secs(config.timeout_secs)),
        )),
        VersionSourceKind::ModuleProxy => Ok(Box::new(ModuleProxyVersionSource::new(
            &config.proxy_url,
            std::time::Duration::from_secs(config.timeout_secs),
        )?)),
    }
}
