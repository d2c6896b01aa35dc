//! Ripple-Scrape main entry point
//!
//! This is the command-line interface for the Ripple-Scrape engine.

use anyhow::Context;
use clap::Parser;
use ripple_scrape::config::{load_config_with_hash, Config};
use ripple_scrape::crawler::{orchestrator_for, seed_queue, CrawlContext, CrawlEvent, StepRegistry};
use ripple_scrape::steps::register_defaults;
use ripple_scrape::storage::{open_storage, ResourceStore, SqliteStorage, WorkQueue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// How many finished resources between progress lines
const PROGRESS_EVERY: u64 = 25;

/// Ripple-Scrape: a rate-limited, queue-backed scraping engine
///
/// Ripple-Scrape pulls URLs from a shared SQLite work queue, admits them
/// through project, proxy, domain and session limits, and runs each one
/// through a configurable pipeline of steps.
#[derive(Parser, Debug)]
#[command(name = "ripple-scrape")]
#[command(version)]
#[command(about = "A rate-limited, queue-backed scraping engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Clear the work queue and stored resources before scraping
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be scraped without scraping
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show work queue statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config).await
    } else {
        handle_scrape(config, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_scrape=info,warn"),
            1 => EnvFilter::new("ripple_scrape=debug,info"),
            2 => EnvFilter::new("ripple_scrape=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be scraped
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let mut registry = StepRegistry::new();
    register_defaults(&mut registry);
    let pipeline = registry
        .build(&config.pipeline)
        .context("Pipeline does not build")?;

    println!("=== Ripple-Scrape Dry Run ===\n");

    println!("Project: {}", config.project.name);
    println!("  Database: {}", config.project.database_path);
    match config.project.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }
    println!("  Same domain only: {}", config.project.same_domain);

    let concurrency = &config.concurrency;
    println!("\nConcurrency:");
    for (level, limits) in [
        ("project", concurrency.project),
        ("proxy", concurrency.proxy),
        ("domain", concurrency.domain),
        ("session", concurrency.session),
    ] {
        match limits {
            Some(limits) => println!(
                "  {}: max-requests {}, delay {}",
                level,
                limits
                    .max_requests
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                limits
                    .delay
                    .map(|d| format!("{}ms", d))
                    .unwrap_or_else(|| "-".to_string())
            ),
            None => println!("  {}: default", level),
        }
    }

    println!("\nProxies ({}):", config.proxies.len());
    for proxy in &config.proxies {
        println!("  - {}:{}", proxy.host, proxy.port);
    }

    println!("\nPipeline:");
    for name in pipeline.step_names() {
        println!("  - {}", name);
    }

    println!("\nSeeds ({}):", config.project.seeds.len());
    for seed in &config.project.seeds {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows queue statistics from the database
async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.project.database_path);

    let storage = SqliteStorage::new(Path::new(&config.project.database_path))?;

    println!("Queue entries: {}", storage.count().await?);
    for (status, count) in storage.status_counts()? {
        println!("  {:<12} {}", status.to_string(), count);
    }
    println!("Stored resources: {}", storage.count_resources().await?);

    Ok(())
}

/// Handles the main scrape operation
async fn handle_scrape(config: Config, fresh: bool) -> anyhow::Result<()> {
    let storage = Arc::new(open_storage(Path::new(&config.project.database_path))?);

    if fresh {
        tracing::info!("Starting fresh scrape (clearing previous state)");
        storage.clear()?;
    }
    seed_queue(storage.as_ref(), &config.project.seeds).await?;

    let (tx, rx) = mpsc::channel(256);
    let context = CrawlContext::new(&config.project.name).with_events(tx);
    let orchestrator = orchestrator_for(&config, storage, context)?;

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight resources");
            stop.stop();
        }
    });

    let reporter = tokio::spawn(report_progress(rx));

    let result = orchestrator.run().await;
    if let Err(e) = reporter.await {
        tracing::warn!("Progress reporter ended abnormally: {}", e);
    }

    let summary = result.context("Scrape failed")?;
    tracing::info!(
        "Scrape finished: {} scraped, {} failed",
        summary.scraped,
        summary.failed
    );
    Ok(())
}

/// Logs periodic progress from crawl events until the run ends
async fn report_progress(mut rx: mpsc::Receiver<CrawlEvent>) {
    let mut finished = 0u64;
    let mut failed = 0u64;

    while let Some(event) = rx.recv().await {
        match event {
            CrawlEvent::ResourceScraped { .. } => finished += 1,
            CrawlEvent::ResourceFailed { url, status, error } => {
                finished += 1;
                failed += 1;
                tracing::debug!("Failed {} ({}): {}", url, status, error);
            }
            CrawlEvent::ProjectComplete { .. } | CrawlEvent::ProjectError { .. } => break,
            CrawlEvent::ResourceSelected { .. } => continue,
        }

        if finished % PROGRESS_EVERY == 0 {
            tracing::info!("Progress: {} resources finished, {} failed", finished, failed);
        }
    }
}
