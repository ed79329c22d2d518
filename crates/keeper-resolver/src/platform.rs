use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "darwin",
            Self::Windows => "windows",
        }
    }

    pub fn executable_name(self, binary_name: &str) -> String {
        if self == Self::Windows && !binary_name.to_ascii_lowercase().ends_with(".exe") {
            format!("{binary_name}.exe")
        } else {
            binary_name.to_string()
        }
    }

    pub fn checks_executable_bit(self) -> bool {
        self != Self::Windows
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process environment the search strategies read, captured once so a
/// resolver sees a stable view for its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchEnvironment {
    pub path_dirs: Vec<PathBuf>,
    pub home: Option<PathBuf>,
    pub user_profile: Option<PathBuf>,
    pub program_files: Option<PathBuf>,
    pub program_files_x86: Option<PathBuf>,
}

impl SearchEnvironment {
    pub fn from_process() -> Self {
        let path_dirs = std::env::var_os("PATH")
            .map(|raw| {
                std::env::split_paths(&raw)
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            path_dirs,
            home: non_empty_var("HOME"),
            user_profile: non_empty_var("USERPROFILE"),
            program_files: non_empty_var("ProgramFiles"),
            program_files_x86: non_empty_var("ProgramFiles(x86)"),
        }
    }
}

fn non_empty_var(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
