mod notifier;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sealcal_core::config::SealcalConfig;
use sealcal_core::model::{CalendarModel, ClientEnvironment};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::notifier::DesktopNotifier;
use crate::store::FileStore;

#[derive(Parser)]
#[command(name = "sealcal-notify")]
#[command(about = "Show desktop reminders for your calendar files and apply received replies")]
struct Cli {
    /// Read calendar files from this directory instead of the configured one
    #[arg(short = 'd', long)]
    calendar_dir: Option<PathBuf>,

    /// Use this config file instead of ~/.config/sealcal/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Process the inbox once and exit
    #[arg(long)]
    once: bool,

    /// Seconds between rescans of the calendar directory
    #[arg(long, default_value_t = 300)]
    rescan: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "sealcal_notify=info,sealcal_core=info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SealcalConfig::load_from(path),
        None => SealcalConfig::load(),
    }
    .context("Could not load config")?;
    if let Some(dir) = cli.calendar_dir {
        config.calendar_dir = dir;
    }

    let zone = config.zone();
    let dir = config.data_path();
    info!(dir = %dir.display(), zone = %zone, "Starting");

    let store = Arc::new(FileStore::new(&dir, zone));
    let model = CalendarModel::new(
        store,
        Arc::new(DesktopNotifier),
        zone,
        ClientEnvironment::from_config(&config, true, true),
    );

    if cli.once {
        model.reconciler().process_calendar_replies().await?;
        return Ok(());
    }

    model.init().await?;

    let mut rescan = tokio::time::interval(Duration::from_secs(cli.rescan.max(1)));
    // The first tick fires immediately and init already scanned.
    rescan.tick().await;

    loop {
        tokio::select! {
            _ = rescan.tick() => {
                model.scheduler().cancel_all();
                if let Err(e) = model.init().await {
                    warn!(error = %e, "Rescan failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                model.logout();
                return Ok(());
            }
        }
    }
}
