//! Crawler module for scheduling and running pipeline work
//!
//! This module contains the core scraping logic, including:
//! - Four-level admission control with round-robin proxy selection
//! - A local buffer of claimed work queue entries
//! - Pipeline steps and the registry that builds them from config
//! - The orchestrator loop with dynamic re-entry and redirect handling

mod admission;
mod buffer;
mod events;
mod orchestrator;
mod pipeline;
mod usage;

pub use admission::{Admission, ConcurrencyLimits, ConcurrencyManager};
pub use buffer::ResourceBuffer;
pub use events::{CrawlContext, CrawlEvent, RunSummary};
pub use orchestrator::{Orchestrator, StopHandle};
pub use pipeline::{Client, Pipeline, Project, Step, StepRegistry};
pub use usage::{
    usage_check_from_config, MemoryUsageCheck, NoUsageLimit, UsageCheck, UsageExceeded,
};

use crate::config::Config;
use crate::steps::{register_defaults, HttpClient};
use crate::storage::{NewQueueEntry, SqliteStorage, WorkQueue};
use crate::url::normalize_url;
use crate::Result;
use std::sync::Arc;

/// Adds seed URLs to the work queue at depth 0
///
/// Seeds already in the queue are left untouched, so a resumed run keeps
/// its progress.
///
/// # Returns
///
/// * `Ok(usize)` - Number of seeds that were newly queued
/// * `Err(CrawlError)` - A seed did not normalize or the queue failed
pub async fn seed_queue(queue: &dyn WorkQueue, seeds: &[String]) -> Result<usize> {
    let entries = seeds
        .iter()
        .map(|seed| Ok(NewQueueEntry::eligible(normalize_url(seed)?.as_str(), 0)))
        .collect::<Result<Vec<_>>>()?;

    let inserted = queue.add(&entries).await?;
    tracing::info!(
        seeds = seeds.len(),
        queued = inserted.len(),
        "Seeded work queue"
    );
    Ok(inserted.len())
}

/// Builds an orchestrator running the default HTTP steps against `storage`
pub fn orchestrator_for(
    config: &Config,
    storage: Arc<SqliteStorage>,
    context: CrawlContext,
) -> Result<Orchestrator<HttpClient>> {
    let mut registry = StepRegistry::new();
    register_defaults(&mut registry);

    let client = HttpClient::from_config(&config.client)?;
    let project = Project::from_config(config, storage.clone(), storage);
    Orchestrator::from_config(config, project, &registry, client, context)
}

/// Runs a complete scrape of one project
///
/// This is the main entry point for a crawl. It will:
/// 1. Open the project's SQLite storage
/// 2. Queue the configured seeds
/// 3. Build the pipeline and HTTP client
/// 4. Run the orchestrator until the queue is exhausted
///
/// # Arguments
///
/// * `config` - The validated project configuration
///
/// # Returns
///
/// * `Ok(RunSummary)` - Scrape completed
/// * `Err(CrawlError)` - Scrape aborted
pub async fn crawl(config: &Config) -> Result<RunSummary> {
    let storage = Arc::new(crate::storage::open_storage(std::path::Path::new(
        &config.project.database_path,
    ))?);
    seed_queue(storage.as_ref(), &config.project.seeds).await?;

    let context = CrawlContext::new(&config.project.name);
    orchestrator_for(config, storage, context)?.run().await
}
