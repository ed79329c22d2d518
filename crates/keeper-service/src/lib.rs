mod error;
mod launchd;
mod runner;
mod supervisor;
mod systemd;
mod windows;

pub use error::ServiceError;
pub use launchd::{
    launchd_list_reports_running, parse_plist_program_path, render_launchd_plist,
    LaunchdSupervisor,
};
pub use runner::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use supervisor::{platform_supervisor, ServiceSupervisor};
pub use systemd::{extract_exec_start_path, parse_unit_exec_start, render_unit_file, SystemdSupervisor};
pub use windows::{
    extract_windows_binary_path, parse_reg_query_path, parse_sc_binary_path, sc_query_reports_running,
    sc_reports_not_registered, WindowsScSupervisor,
};
