//! Ganymede device daemon binary.

use clap::{Parser, Subcommand};
use ganymede_device::config::Config;
use ganymede_device::daemon::{self, Services};
use ganymede_device::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ganymede-device")]
#[command(about = "Environmental sensor and light controller for Ganymede")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// Authorize this device with a user account
    Register,
    /// Poll the device config once
    Poll,
    /// Refresh the access token once
    Refresh,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::default().to_toml());
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // Initialize logging first
    logging::init(&config.logging);

    let command = args.command.unwrap_or(Command::Run);
    if let Err(e) = run(config, command) {
        tracing::error!(error = %e, "fatal");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(config: Config, command: Command) -> Result<(), daemon::DaemonError> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ganymede-device starting");
    let services = Services::build(config)?;

    match command {
        Command::Run => daemon::run(services),
        Command::Register => daemon::register(&services),
        Command::Poll => daemon::poll_once(&services),
        Command::Refresh => daemon::refresh_once(&services),
    }
}
