mod completion;
mod flows;
mod logging;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use keeper_core::LogFormat;

use crate::flows::{run_check, run_detect, run_service_loop, run_status, Runtime};

#[derive(Parser, Debug)]
#[command(name = "agent-keeper", version)]
#[command(
    about = "Keeps a managed agent service on its latest published version",
    long_about = None
)]
struct Cli {
    /// Path to keeper.toml; a missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the state directory (override file, attempt journal, logs).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    log_format: Option<CliLogFormat>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check for updates on a fixed interval (the service entry point).
    Run {
        /// Run a single check-and-update tick and exit.
        #[arg(long)]
        once: bool,
    },
    /// Compare the installed and latest versions without changing anything.
    Check,
    /// Locate the managed binary and print the full report on failure.
    Detect,
    /// Show configuration, service state and recent update attempts.
    Status,
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliLogFormat {
    Pretty,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}

fn run_cli(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Commands::Run { once: false });
    if let Commands::Completions { shell } = command {
        let mut stdout = std::io::stdout();
        return completion::write_completions_script(shell, &mut stdout);
    }

    let runtime = Runtime::load(cli.config.as_deref(), cli.state_dir)?;
    let format = cli
        .log_format
        .map(LogFormat::from)
        .unwrap_or(runtime.config.logging.format);
    let _log_guard = logging::init_logging(&runtime.config.logging, format, &runtime.log_dir())?;

    match command {
        Commands::Run { once } => run_service_loop(&runtime, once),
        Commands::Check => run_check(&runtime),
        Commands::Detect => run_detect(&runtime),
        Commands::Status => run_status(&runtime),
        Commands::Completions { .. } => Ok(()),
    }
}
