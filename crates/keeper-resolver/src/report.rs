use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use keeper_core::DetectionMethod;
use thiserror::Error;

use crate::Platform;

const RULE: &str =
    "================================================================================";
const SECTION_RULE: &str =
    "--------------------------------------------------------------------------------";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub method: DetectionMethod,
    pub reason: String,
    pub path_found: Option<PathBuf>,
    pub searched: Vec<PathBuf>,
}

/// Produced when every detection strategy failed. `Display` is a one-line
/// summary; [`DetectionReport::render`] is the full operator report.
#[derive(Debug, Clone, Error)]
#[error(
    "failed to detect {executable} binary path after trying {} methods",
    .failures.len()
)]
pub struct DetectionReport {
    pub platform: Platform,
    pub arch: &'static str,
    pub generated_at: DateTime<Utc>,
    pub executable: String,
    pub service_name: String,
    pub install_target: String,
    pub override_file: PathBuf,
    pub failures: Vec<StrategyFailure>,
}

impl DetectionReport {
    pub fn searched_for(&self, method: DetectionMethod) -> &[PathBuf] {
        self.failures
            .iter()
            .find(|failure| failure.method == method)
            .map(|failure| failure.searched.as_slice())
            .unwrap_or_default()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(
            out,
            "{} BINARY PATH DETECTION FAILED",
            self.executable.to_ascii_uppercase()
        );
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out);
        let _ = writeln!(out, "Platform: {} ({})", self.platform, self.arch);
        let _ = writeln!(
            out,
            "Timestamp: {}",
            self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "All detection methods failed to locate the {} binary.",
            self.executable
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "ATTEMPTED DETECTION METHODS:");
        let _ = writeln!(out, "{SECTION_RULE}");
        for (index, failure) in self.failures.iter().enumerate() {
            let _ = writeln!(
                out,
                "\n{}. {} ({})",
                index + 1,
                failure.method.description(),
                failure.method
            );
            let _ = writeln!(out, "   Status: FAILED");
            if let Some(path) = &failure.path_found {
                let _ = writeln!(out, "   Path Found: {}", path.display());
            }
            let _ = writeln!(out, "   Error: {}", failure.reason);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "TROUBLESHOOTING STEPS:");
        let _ = writeln!(out, "{SECTION_RULE}");
        let _ = writeln!(out);
        self.render_platform_steps(&mut out);
        let _ = writeln!(out, "5. Manual configuration option:");
        let _ = writeln!(
            out,
            "   Create a configuration file to manually specify the binary path:"
        );
        let _ = writeln!(out, "   File: {}", self.override_file.display());
        let _ = writeln!(out, "   Content:");
        let _ = writeln!(out, "   {{");
        let _ = writeln!(
            out,
            "     \"binaryPath\": \"/full/path/to/{}\",",
            self.executable
        );
        let _ = writeln!(out, "     \"enableAutoDetection\": true");
        let _ = writeln!(out, "   }}");
        let _ = writeln!(out);
        let _ = writeln!(out, "6. Reinstall the {} binary:", self.executable);
        let _ = writeln!(out, "   If the binary is missing, reinstall it using:");
        let _ = writeln!(out, "   $ go install {}", self.install_target);
        let _ = writeln!(out);

        let _ = writeln!(out, "SEARCHED LOCATIONS:");
        let _ = writeln!(out, "{SECTION_RULE}");
        let _ = writeln!(out);
        let common = self.searched_for(DetectionMethod::CommonPaths);
        if !common.is_empty() {
            let _ = writeln!(out, "Common installation directories checked:");
            for path in common {
                let _ = writeln!(out, "  - {}", path.display());
            }
            let _ = writeln!(out);
        }
        let path_dirs = self.searched_for(DetectionMethod::PathSearch);
        if !path_dirs.is_empty() {
            let _ = writeln!(out, "PATH environment variable directories:");
            for dir in path_dirs {
                let _ = writeln!(out, "  - {}", dir.display());
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "NEXT STEPS:");
        let _ = writeln!(out, "{SECTION_RULE}");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "The updater will continue running and retry detection on the next update check."
        );
        let _ = writeln!(
            out,
            "Please resolve the issue using the troubleshooting steps above."
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "{RULE}");
        out
    }

    fn render_platform_steps(&self, out: &mut String) {
        let exe = &self.executable;
        let service = &self.service_name;
        match self.platform {
            Platform::Linux | Platform::MacOs => {
                let label = if self.platform == Platform::Linux {
                    "Linux"
                } else {
                    "macOS"
                };
                let _ = writeln!(out, "For {label} systems:");
                let _ = writeln!(out);
                let _ = writeln!(out, "1. Verify the {exe} binary is installed:");
                let _ = writeln!(out, "   $ which {exe}");
                let _ = writeln!(out, "   $ ls -la /usr/local/bin/{exe}");
                let _ = writeln!(out, "   $ ls -la ~/go/bin/{exe}");
                let _ = writeln!(out);
                let _ = writeln!(out, "2. Check if the {exe} service is configured:");
                if self.platform == Platform::Linux {
                    let _ = writeln!(out, "   $ systemctl status {service}");
                    let _ = writeln!(out, "   $ cat /etc/systemd/system/{service}.service");
                } else {
                    let _ = writeln!(out, "   $ launchctl list | grep {service}");
                    let _ = writeln!(out, "   $ cat /Library/LaunchDaemons/{service}.plist");
                }
                let _ = writeln!(out);
                let _ = writeln!(out, "3. Verify the binary has execute permissions:");
                let _ = writeln!(out, "   $ chmod +x /path/to/{exe}");
                let _ = writeln!(out);
                let _ = writeln!(out, "4. Check if the binary is in your PATH:");
                let _ = writeln!(out, "   $ echo $PATH");
                let _ = writeln!(out);
            }
            Platform::Windows => {
                let _ = writeln!(out, "For Windows systems:");
                let _ = writeln!(out);
                let _ = writeln!(out, "1. Verify the {exe} binary is installed:");
                let _ = writeln!(out, "   > where {exe}");
                let _ = writeln!(out, "   > dir \"%USERPROFILE%\\go\\bin\\{exe}\"");
                let _ = writeln!(out);
                let _ = writeln!(out, "2. Check if the {exe} service is configured:");
                let _ = writeln!(out, "   > sc query {service}");
                let _ = writeln!(out, "   > sc qc {service}");
                let _ = writeln!(out);
                let _ = writeln!(out, "3. Verify the service account can read the binary:");
                let _ = writeln!(out, "   > icacls \"C:\\path\\to\\{exe}\"");
                let _ = writeln!(out);
                let _ = writeln!(out, "4. Check if the binary is in your PATH:");
                let _ = writeln!(out, "   > echo %PATH%");
                let _ = writeln!(out);
            }
        }
    }
}
