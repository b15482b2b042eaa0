//! ---
//! fu_section: "05-networking-external-interfaces"
//! fu_subsection: "binary"
//! fu_type: "source"
//! fu_scope: "code"
//! fu_description: "Binary entrypoint for the fleetup agent CLI."
//! fu_version: "v0.0.0-prealpha"
//! fu_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use fleetup_common::logging::{init_console, init_tracing};
use fleetup_common::{AppConfig, VersionInfo};
use fleetup_core::UpdateError;

mod commands;
mod wiring;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "fleetup device update agent",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log debug output to stderr")]
    verbose: bool,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Commands {
    #[command(about = "List available targets and report whether an update is due")]
    Check,
    #[command(about = "Download the content of a target (default: latest)")]
    Fetch {
        #[arg(value_name = "TARGET", help = "Target name or version")]
        target: Option<String>,
    },
    #[command(about = "Stop replaced apps and install fetched content")]
    Install,
    #[command(about = "Start the installed target")]
    Start,
    #[command(about = "Run every phase towards a target (default: latest)")]
    Update {
        #[arg(value_name = "TARGET", help = "Target name or version")]
        target: Option<String>,
    },
    #[command(about = "Abort the update in progress")]
    Cancel,
    #[command(about = "Show the current target, app states and queued events")]
    Status,
    #[command(about = "Poll for updates until interrupted")]
    Daemon {
        #[arg(long, help = "Run a single attempt and exit")]
        run_once: bool,
    },
    #[command(about = "Compare the apps of two targets")]
    Diff {
        #[arg(value_name = "TO", help = "Target name or version (default: latest)")]
        to: Option<String>,
        #[arg(value_name = "FROM", help = "Target name or version (default: current)")]
        from: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return ExitCode::SUCCESS;
    }
    let Some(command) = cli.command.clone() else {
        eprintln!("error: a subcommand is required (see --help)");
        return ExitCode::FAILURE;
    };

    match run(&cli, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<UpdateError>() {
            Some(update) if update.is_no_update() => {
                println!("already up to date");
                ExitCode::SUCCESS
            }
            _ => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: &Cli, command: Commands) -> Result<()> {
    let config = load_config(cli)?;
    if matches!(command, Commands::Daemon { .. }) {
        init_tracing("fleetup", &config.logging)?;
    } else {
        init_console(cli.verbose);
    }
    commands::dispatch(config, command).await
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.extend(AppConfig::default_candidates());
    AppConfig::load(&candidates)
}
