use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use keeper_core::{run_with_timeout, AgentDescriptor};
use tracing::{debug, info, warn};

use crate::fs_utils::remove_file_if_exists;

const GOROOT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

const WINDOWS_GCC_DIRS: &[&str] = &[
    "C:\\MinGW\\bin",
    "C:\\MinGW64\\bin",
    "C:\\TDM-GCC-64\\bin",
    "C:\\msys64\\mingw64\\bin",
    "C:\\msys64\\ucrt64\\bin",
    "C:\\Program Files\\mingw-w64\\bin",
    "C:\\Program Files (x86)\\mingw-w64\\bin",
];

/// Produces a fresh executable for the requested version.
pub trait BuildToolchain: Send + Sync {
    fn compile(&self, agent: &AgentDescriptor, version: &str) -> Result<PathBuf>;
}

/// Builds with `go install`, writing into a private `GOBIN` so the managed
/// binary is only ever replaced by the installer.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    go_binary: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
    gopath: Option<PathBuf>,
}

impl GoToolchain {
    pub fn new(output_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            go_binary: PathBuf::from(if cfg!(windows) { "go.exe" } else { "go" }),
            output_dir: output_dir.into(),
            timeout,
            gopath: None,
        }
    }

    pub fn with_go_binary(mut self, go_binary: impl Into<PathBuf>) -> Self {
        self.go_binary = go_binary.into();
        self
    }

    pub fn with_gopath(mut self, gopath: impl Into<PathBuf>) -> Self {
        self.gopath = Some(gopath.into());
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn environment(&self) -> Result<Vec<(String, OsString)>> {
        let lookup = |key: &str| {
            if key == "GOPATH" {
                if let Some(gopath) = &self.gopath {
                    return Some(gopath.clone().into_os_string());
                }
            }
            std::env::var_os(key)
        };
        let mut vars = go_environment(&lookup)?;

        if std::env::var_os("GOROOT").is_none() {
            match self.query_goroot() {
                Some(goroot) => vars.push(("GOROOT".to_string(), goroot.into())),
                None => warn!("could not determine GOROOT; relying on the go binary default"),
            }
        }

        if cfg!(windows) {
            if let Some(path) = windows_path_with_gcc() {
                vars.push(("PATH".to_string(), path));
            }
        }

        vars.push((
            "GOBIN".to_string(),
            self.output_dir.clone().into_os_string(),
        ));
        Ok(vars)
    }

    fn query_goroot(&self) -> Option<String> {
        let mut command = Command::new(&self.go_binary);
        command.args(["env", "GOROOT"]);
        let output = run_with_timeout(&mut command, GOROOT_QUERY_TIMEOUT).ok()?;
        if !output.status.success() {
            return None;
        }
        let goroot = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!goroot.is_empty()).then_some(goroot)
    }
}

impl BuildToolchain for GoToolchain {
    fn compile(&self, agent: &AgentDescriptor, version: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        let output_path = self.output_dir.join(agent.executable_name());
        remove_file_if_exists(&output_path).with_context(|| {
            format!("failed to clear previous build output {}", output_path.display())
        })?;

        let target = agent.install_target(version);
        let env = self.environment()?;
        info!(target = %target, gobin = %self.output_dir.display(), "compiling agent");

        let mut command = Command::new(&self.go_binary);
        command.arg("install").arg(&target).envs(env);
        let output = run_with_timeout(&mut command, self.timeout)
            .with_context(|| format!("go install {target} failed"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(anyhow!(
                "go install {target} exited with {}: {} {}",
                output.status,
                stderr.trim(),
                stdout.trim()
            ));
        }

        if !output_path.is_file() {
            return Err(anyhow!(
                "go install {target} succeeded but produced no binary at {}",
                output_path.display()
            ));
        }
        debug!(path = %output_path.display(), "compiled agent binary");
        Ok(output_path)
    }
}

/// GOPATH, GOCACHE, GOMODCACHE and CGO_ENABLED for a build, defaulting any
/// that are unset. A service account often has none of them.
pub fn go_environment(lookup: &dyn Fn(&str) -> Option<OsString>) -> Result<Vec<(String, OsString)>> {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

    let gopath = match non_empty("GOPATH") {
        Some(gopath) => PathBuf::from(gopath),
        None => {
            let home = non_empty("HOME")
                .or_else(|| non_empty("USERPROFILE"))
                .ok_or_else(|| {
                    anyhow!("cannot determine GOPATH: neither HOME nor USERPROFILE is set")
                })?;
            PathBuf::from(home).join("go")
        }
    };
    let gocache = non_empty("GOCACHE")
        .map(PathBuf::from)
        .unwrap_or_else(|| gopath.join("cache"));
    let gomodcache = non_empty("GOMODCACHE")
        .map(PathBuf::from)
        .unwrap_or_else(|| gopath.join("pkg").join("mod"));

    Ok(vec![
        ("GOPATH".to_string(), gopath.into_os_string()),
        ("GOCACHE".to_string(), gocache.into_os_string()),
        ("GOMODCACHE".to_string(), gomodcache.into_os_string()),
        ("CGO_ENABLED".to_string(), OsString::from("1")),
    ])
}

pub fn find_gcc_dir(candidates: &[PathBuf], executable: &str) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|dir| dir.join(executable).is_file())
        .cloned()
}

fn windows_path_with_gcc() -> Option<OsString> {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let path_dirs: Vec<PathBuf> = std::env::split_paths(&current).collect();
    if find_gcc_dir(&path_dirs, "gcc.exe").is_some() {
        return None;
    }

    let candidates: Vec<PathBuf> = WINDOWS_GCC_DIRS.iter().map(PathBuf::from).collect();
    let Some(gcc_dir) = find_gcc_dir(&candidates, "gcc.exe") else {
        warn!("gcc was not found; cgo builds will likely fail");
        return None;
    };
    info!(dir = %gcc_dir.display(), "adding gcc to PATH for the build");
    let joined = std::env::join_paths(std::iter::once(gcc_dir).chain(path_dirs)).ok()?;
    Some(joined)
}
