use anyhow::Result;
use aurum::cli::setup::{setup, setup_at_path};
use aurum::core::log::init_logging;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for aurum::AppCommand {
    fn from(cmd: Commands) -> aurum::AppCommand {
        match cmd {
            Commands::Price { refresh } => aurum::AppCommand::Price { refresh },
            Commands::History { days } => aurum::AppCommand::History { days },
            Commands::Prune { keep_days } => aurum::AppCommand::Prune { keep_days },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display today's gold price in the quote currency
    Price {
        /// Ignore cached results and today's stored snapshot
        #[arg(short, long)]
        refresh: bool,
    },
    /// Display the reconciled price history
    History {
        /// Number of calendar days to cover
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Delete stored daily snapshots
    Prune {
        /// Keep snapshots from the last N days
        #[arg(short, long, default_value_t = 90)]
        keep_days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => setup_at_path(path),
            None => setup(),
        },
        Some(cmd) => aurum::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
