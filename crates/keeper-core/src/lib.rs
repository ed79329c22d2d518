mod agent;
mod config;
mod context;
mod process;
mod version;

pub use agent::AgentDescriptor;
pub use config::{
    KeeperConfig, LogFormat, LoggingConfig, ManualOverride, ScheduleConfig, UpdateConfig,
    VersionSourceConfig, VersionSourceKind, OVERRIDE_FILE_NAME,
};
pub use context::{
    backup_path_for, legacy_backup_path_for, with_suffix, DetectionMethod, UpdateContext,
};
pub use process::run_with_timeout;
pub use version::{extract_version_token, is_newer, version_triple};

#[cfg(test)]
mod tests;
