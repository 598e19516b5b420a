pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::core::config::AppConfig;
use crate::core::market::MarketService;
use anyhow::Result;
use tracing::{debug, info};

pub enum AppCommand {
    Price { refresh: bool },
    History { days: Option<u32> },
    Prune { keep_days: u32 },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("Aurum starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let service = MarketService::from_config(config)?;

    match command {
        AppCommand::Price { refresh } => cli::price::run(&service, refresh).await,
        AppCommand::History { days } => cli::history::run(&service, days).await,
        AppCommand::Prune { keep_days } => cli::prune::run(&service, keep_days).await,
    }
}
