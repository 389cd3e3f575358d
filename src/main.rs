//! /x/ Board Harvester
//!
//! Scrapes the /x/ board, archives media and runs the daily analysis.
//!
//! Usage:
//!   xboard-harvester              # Run the scheduler (scrape every 2h, analysis daily)
//!   xboard-harvester --once       # Single scrape pass
//!   xboard-harvester --analyze    # Single analysis run
//!   xboard-harvester --maintain   # Apply retention policies
//!   xboard-harvester --stats      # Show storage statistics

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xboard_harvester::llm::{ChatClient, TextGenerator};
use xboard_harvester::maintenance::Maintenance;
use xboard_harvester::storage::DataPaths;
use xboard_harvester::{Config, FetchClient, Harvester, Scheduler};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "xboard-harvester")]
#[command(about = "/x/ board harvester: thread snapshots, media archive and trend analysis")]
struct Args {
    /// Configuration file (TOML); defaults apply when it is missing
    #[arg(long, env = "HARVESTER_CONFIG", default_value = "config/settings.toml")]
    config: PathBuf,

    /// Run a single scrape pass and exit
    #[arg(long, conflicts_with_all = ["analyze", "maintain", "stats"])]
    once: bool,

    /// Run a single analysis pass and exit
    #[arg(long, conflicts_with_all = ["maintain", "stats"])]
    analyze: bool,

    /// Purge old snapshots and media, prune the hash index, compact trends
    #[arg(long, conflicts_with = "stats")]
    maintain: bool,

    /// Show storage statistics
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting /x/ harvester...");

    // Load configuration
    let config = Config::load_or_default(&args.config)?;
    info!("Loaded configuration, data directory {}", config.storage.data_dir.display());

    if args.stats {
        run_storage_stats(&config)
    } else if args.maintain {
        run_maintenance(&config)
    } else if args.once {
        let harvester = build_harvester(&config)?;
        let stats = harvester.scrape().await?;
        info!("Scrape finished: {:?}", stats);
        Ok(())
    } else if args.analyze {
        let harvester = build_harvester(&config)?;
        let summary = harvester.analyze().await?;
        info!(
            "Analysis finished: {} articles, mean {:.2}%",
            summary.articles.articles.len(),
            summary.matrix.statistics.mean
        );
        Ok(())
    } else {
        run_scheduler(&config).await
    }
}

fn build_harvester(config: &Config) -> Result<Harvester> {
    let source = Arc::new(FetchClient::new(&config.scraper)?);

    let generator: Option<Arc<dyn TextGenerator>> = match ChatClient::new(&config.llm) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Analysis disabled: {}", e);
            None
        }
    };

    Ok(Harvester::new(config.clone(), source, generator))
}

/// Show storage statistics
fn run_storage_stats(config: &Config) -> Result<()> {
    info!("Gathering storage statistics...");

    let paths = DataPaths::new(&config.storage.data_dir);
    let stats = Maintenance::new(&paths, config).get_stats()?;
    stats.print_report();

    Ok(())
}

/// Apply retention policies
fn run_maintenance(config: &Config) -> Result<()> {
    info!("Running maintenance...");

    let paths = DataPaths::new(&config.storage.data_dir);
    let stats = Maintenance::new(&paths, config).run_all(chrono::Utc::now())?;

    println!("\nMaintenance complete:");
    println!("  Snapshots removed:      {}", stats.snapshots_removed);
    println!("  Snapshot media removed: {}", stats.snapshot_media_removed);
    println!("  Media files deleted:    {}", stats.media_deleted);
    println!("  Hash entries pruned:    {}", stats.hashes_pruned);
    println!("  Trend points dropped:   {}", stats.trend_points_dropped);

    Ok(())
}

/// Run the scheduler until interrupted
async fn run_scheduler(config: &Config) -> Result<()> {
    let harvester = Arc::new(build_harvester(config)?);
    let mut scheduler = Scheduler::new(harvester, config.schedule.clone());
    scheduler.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.stop();

    Ok(())
}
