//! droidenv - Android emulator environment provisioning
//!
//! Command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use droidenv::commands::{PipelineCommand, PipelineKind};
use droidenv::core::DroidEnvError;

#[derive(Parser)]
#[command(name = "droidenv", version, about = "Provision and tear down an Android emulator environment")]
struct Cli {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More logging (-v debug, -vv trace); overrides RUST_LOG
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Install the SDK, create the AVD and launch the emulator
    Provision,
    /// Remove the SDK, the AVD and the persisted environment
    Teardown,
    /// Teardown, then provision
    Reinstall,
    /// Show what is installed
    Status,
}

impl From<Cmd> for PipelineKind {
    fn from(cmd: Cmd) -> Self {
        match cmd {
            Cmd::Provision => PipelineKind::Provision,
            Cmd::Teardown => PipelineKind::Teardown,
            Cmd::Reinstall => PipelineKind::Reinstall,
            Cmd::Status => PipelineKind::Status,
        }
    }
}

// ProcessEnv mutates the process environment; keep every task on this thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let command = PipelineCommand {
        kind: cli.cmd.into(),
        config_path: cli.config,
        json: cli.json,
    };
    command.execute().await
}

/// Log `e` with the friendly message of the underlying droidenv error
fn log_error(e: &anyhow::Error) {
    if let Some(err) = e.downcast_ref::<DroidEnvError>() {
        error!("{}", err.user_message());
        return;
    }
    match e.chain().find_map(|cause| cause.downcast_ref::<DroidEnvError>()) {
        Some(cause) => error!("{}: {}", e, cause.user_message()),
        None => error!("{:#}", e),
    }
}

/// Initialize logging
fn init_logging(verbose: u8) -> Result<()> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
