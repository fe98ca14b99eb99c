//! Mount database tables as read-only files, refreshable without unmounting.
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, error, warn};

mod app_config;
mod daemon;
mod trc;

use crate::app_config::{CliOverrides, Config};
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    about = "Cache database tables in memory and mount them as read-only files."
)]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a dbfs config TOML."
    )]
    config_path: Option<PathBuf>,

    #[command(flatten)]
    overrides: CliOverrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a running instance to reload its tables.
    Refresh {
        /// Process id of the running instance.
        pid: i32,
    },
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    if let Some(Command::Refresh { pid }) = args.command {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGUSR2) {
            eprintln!("Failed to signal process {pid}: {e}");
            std::process::exit(1);
        }
        return;
    }

    // Errors use eprintln since tracing isn't initialized yet.
    let config = Config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    let config = config.merge_cli(args.overrides).validate().unwrap_or_else(|error_messages| {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        std::process::exit(1);
    });

    if let Err(e) = Trc::new(config.debug).init() {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    }

    for warning in &config.warnings {
        warn!("{warning}");
    }
    debug!(mount_point = %config.mount_point.display(), policy = ?config.policy, "Starting.");

    if let Err(e) = daemon::spawn(config) {
        error!("Daemon failed: {e}");
        std::process::exit(1);
    }
}
