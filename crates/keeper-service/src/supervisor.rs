use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{LaunchdSupervisor, ServiceError, SystemdSupervisor, WindowsScSupervisor};

/// Control surface over the OS-native service manager.
///
/// `stop` and `uninstall` report [`ServiceError::NotRegistered`] when the
/// service does not exist so callers can treat that as already done.
pub trait ServiceSupervisor: Send + Sync {
    fn stop(&self, name: &str) -> Result<(), ServiceError>;
    fn uninstall(&self, name: &str) -> Result<(), ServiceError>;
    fn install(&self, name: &str, binary_path: &Path) -> Result<(), ServiceError>;
    fn start(&self, name: &str) -> Result<(), ServiceError>;
    fn is_running(&self, name: &str) -> Result<bool, ServiceError>;
    fn service_binary_path(&self, name: &str) -> Result<PathBuf, ServiceError>;
}

pub fn platform_supervisor(display_name: &str) -> Arc<dyn ServiceSupervisor> {
    if cfg!(windows) {
        Arc::new(WindowsScSupervisor::new(display_name))
    } else if cfg!(target_os = "macos") {
        Arc::new(LaunchdSupervisor::new())
    } else {
        Arc::new(SystemdSupervisor::new(display_name))
    }
}
