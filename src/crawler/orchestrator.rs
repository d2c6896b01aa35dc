//! Orchestrator - the scrape loop for one project
//!
//! This module contains the control loop that ties the crawler together:
//! - Validating concurrency settings against the client
//! - Pulling resources from the local buffer on a fixed tick
//! - Submitting them to admission control
//! - Running admitted resources through the pipeline without blocking the tick
//! - Re-entering dynamic resources and following redirects
//! - Draining in-flight work on stop and detecting completion
//!
//! Admission state is owned by the loop itself. Pipeline runs report back
//! through a `JoinSet`, and the loop releases their admission slots as they
//! finish.

use crate::config::{Config, ConcurrencyConfig};
use crate::crawler::admission::{Admission, ConcurrencyLimits, ConcurrencyManager};
use crate::crawler::buffer::ResourceBuffer;
use crate::crawler::events::{CrawlContext, CrawlEvent, RunSummary};
use crate::crawler::pipeline::{Client, Pipeline, Project, StepRegistry};
use crate::crawler::usage::{usage_check_from_config, NoUsageLimit, UsageCheck};
use crate::resource::{Content, PartialResource, Proxy, Resource};
use crate::state::QueueStatus;
use crate::storage::{NewQueueEntry, WorkQueue};
use crate::url::resolve_link;
use crate::{CrawlError, Result, StepError, UrlError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;
use url::Url;

/// Redirect hops allowed for one resource
const MAX_REDIRECTS: u32 = 10;

/// Requests a graceful stop of a running orchestrator
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Stops admitting new resources; in-flight runs finish normally
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Drives one project's scrape run
pub struct Orchestrator<C: Client> {
    project: Project,
    pipeline: Arc<Pipeline<C>>,
    client: Arc<C>,
    concurrency: ConcurrencyConfig,
    proxies: Vec<Proxy>,
    usage: Box<dyn UsageCheck>,
    context: CrawlContext,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl<C: Client> Orchestrator<C> {
    /// Creates an orchestrator with default concurrency, no proxies and no
    /// usage limit
    pub fn new(project: Project, pipeline: Pipeline<C>, client: C, context: CrawlContext) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            project,
            pipeline: Arc::new(pipeline),
            client: Arc::new(client),
            concurrency: ConcurrencyConfig::default(),
            proxies: Vec::new(),
            usage: Box::new(NoUsageLimit),
            context,
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// Creates an orchestrator from a loaded project config
    ///
    /// # Arguments
    ///
    /// * `config` - The project configuration
    /// * `project` - Project state handed to steps
    /// * `registry` - Step constructors the configured pipeline is built from
    /// * `client` - Handle passed to every step
    /// * `context` - Logging span and event sink for the run
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to run
    /// * `Err(CrawlError::Config)` - The pipeline names an unknown step or bad options
    pub fn from_config(
        config: &Config,
        project: Project,
        registry: &StepRegistry<C>,
        client: C,
        context: CrawlContext,
    ) -> Result<Self> {
        let pipeline = registry.build(&config.pipeline)?;
        let proxies = config
            .proxies
            .iter()
            .map(|p| Proxy::http(&p.host, p.port))
            .collect();

        Ok(Self::new(project, pipeline, client, context)
            .with_concurrency(config.concurrency.clone())
            .with_proxies(proxies)
            .with_usage_check(usage_check_from_config(&config.usage)))
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<Proxy>) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_usage_check(mut self, usage: Box<dyn UsageCheck>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_events(mut self, sender: mpsc::Sender<CrawlEvent>) -> Self {
        self.context = self.context.with_events(sender);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Runs the project until the queue is exhausted or a stop is requested
    ///
    /// Per-resource failures are recorded on their queue entries and reported
    /// as events; only setup, client and buffer failures end the run early.
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Every admitted resource finished
    /// * `Err(CrawlError)` - The run was aborted
    pub async fn run(self) -> Result<RunSummary> {
        let span = self.context.span().clone();
        let result = self.run_inner().instrument(span.clone()).await;
        let project = self.project.name.clone();

        match &result {
            Ok(summary) => {
                span.in_scope(|| {
                    tracing::info!(
                        scraped = summary.scraped,
                        failed = summary.failed,
                        "Scrape run complete"
                    )
                });
                self.context
                    .emit(CrawlEvent::ProjectComplete {
                        project,
                        summary: *summary,
                    })
                    .await;
            }
            Err(e) => {
                span.in_scope(|| tracing::error!(error = %e, "Scrape run failed"));
                self.context
                    .emit(CrawlEvent::ProjectError {
                        project,
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        result
    }

    async fn run_inner(&self) -> Result<RunSummary> {
        let limits = ConcurrencyLimits::from_config(&self.concurrency, self.proxies.len());
        if self.client.single_task() && limits.project.max_requests != Some(1) {
            return Err(CrawlError::InvalidConcurrency(format!(
                "client runs one task at a time but project max-requests is {}",
                limits
                    .project
                    .max_requests
                    .map(|max| max.to_string())
                    .unwrap_or_else(|| "unlimited".to_string())
            )));
        }

        self.client.open().await?;
        let result = self.scrape_loop(limits).await;
        let closed = self.client.close().await;
        if let Err(e) = &closed {
            tracing::warn!(error = %e, "Failed to close client");
        }

        let summary = result?;
        closed?;
        Ok(summary)
    }

    async fn scrape_loop(&self, limits: ConcurrencyLimits) -> Result<RunSummary> {
        let mut state = LoopState {
            manager: ConcurrencyManager::new(
                limits,
                self.proxies.clone(),
                Duration::from_millis(self.concurrency.check_interval_floor_ms),
                Duration::from_millis(self.concurrency.completion_grace_ms),
            ),
            buffer: ResourceBuffer::new(
                self.project.queue.clone(),
                ResourceBuffer::capacity_for(
                    limits.project.max_requests,
                    self.concurrency.buffer_min_capacity,
                ),
            ),
            runs: JoinSet::new(),
            summary: RunSummary::default(),
            stopping: false,
        };

        let check_interval = state.manager.check_interval();
        tracing::info!(
            steps = ?self.pipeline.step_names(),
            proxies = state.manager.proxies().len(),
            buffer_capacity = state.buffer.capacity(),
            check_interval_ms = check_interval.as_millis() as u64,
            "Starting scrape run"
        );

        let mut ticker = tokio::time::interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let fatal = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(&mut state).await {
                        Ok(true) => break None,
                        Ok(false) => {}
                        Err(e) => break Some(e),
                    }
                }
                Some(joined) = state.runs.join_next() => {
                    if let Err(e) = self.finish_run(&mut state, joined).await {
                        break Some(e);
                    }
                }
            }
        };

        match fatal {
            None => Ok(state.summary),
            Some(e) => {
                self.abort(&mut state).await;
                Err(e)
            }
        }
    }

    /// One scheduling step
    ///
    /// Returns true once the run is complete.
    async fn tick(&self, state: &mut LoopState) -> Result<bool> {
        if !state.stopping && *self.stop_tx.borrow() {
            state.stopping = true;
            tracing::info!(
                in_flight = state.manager.in_flight(),
                "Stop requested, draining in-flight resources"
            );
        }

        if !state.stopping {
            if let Err(exceeded) = self.usage.check() {
                tracing::debug!(reason = %exceeded, "Resource usage over limit, skipping tick");
                return Ok(false);
            }
        }

        let next = state.buffer.get_resource(state.stopping).await?;
        let now = Instant::now();

        let Some(mut resource) = next else {
            let idle = state.manager.in_flight() == 0;
            return Ok(idle && (state.stopping || state.manager.is_scraping_complete(now)));
        };

        let admission = match state.manager.check(&resource, now) {
            Ok(admission) => admission,
            Err(level) => {
                tracing::trace!(url = %resource.url, %level, "Admission rejected");
                state.buffer.requeue(resource).await;
                return Ok(false);
            }
        };

        state.manager.add_resource(&admission, now);
        resource.proxy = Some(admission.proxy.clone());

        tracing::debug!(url = %resource.url, proxy = %admission.proxy, "Resource selected");
        self.context
            .emit(CrawlEvent::ResourceSelected {
                url: resource.url.to_string(),
                proxy: admission.proxy.to_string(),
            })
            .await;

        let job = ScrapeJob {
            project: self.project.clone(),
            pipeline: self.pipeline.clone(),
            client: self.client.clone(),
            stop: self.stop_tx.subscribe(),
        };
        let span = tracing::debug_span!("resource", url = %resource.url);
        state
            .runs
            .spawn(run_resource(job, resource, admission).instrument(span));

        Ok(false)
    }

    async fn finish_run(
        &self,
        state: &mut LoopState,
        joined: std::result::Result<RunOutcome, JoinError>,
    ) -> Result<()> {
        let run = joined.map_err(|e| {
            tracing::error!(error = %e, "Pipeline task lost");
            CrawlError::StepPanicked {
                url: "<unknown>".to_string(),
            }
        })?;

        state.manager.remove_resource(&run.admission, Instant::now());

        let event = match run.outcome {
            ResourceOutcome::Scraped {
                url,
                status,
                passes,
            } => {
                state.summary.scraped += 1;
                tracing::debug!(url = %url, ?status, passes, "Resource scraped");
                CrawlEvent::ResourceScraped {
                    url,
                    status,
                    passes,
                }
            }
            ResourceOutcome::Failed { url, status, error } => {
                state.summary.failed += 1;
                CrawlEvent::ResourceFailed { url, status, error }
            }
        };
        self.context.emit(event).await;
        Ok(())
    }

    /// Winds the run down after a fatal error
    ///
    /// Buffered resources go back to the queue and in-flight runs are awaited,
    /// so no claimed entry is left in progress.
    async fn abort(&self, state: &mut LoopState) {
        if let Err(e) = state.buffer.get_resource(true).await {
            tracing::error!(error = %e, "Failed to release buffered resources");
        }
        self.drain(state).await;
    }

    async fn drain(&self, state: &mut LoopState) {
        if state.runs.is_empty() {
            return;
        }
        tracing::info!(in_flight = state.runs.len(), "Waiting for in-flight resources");
        while let Some(joined) = state.runs.join_next().await {
            if let Err(e) = self.finish_run(state, joined).await {
                tracing::warn!(error = %e, "In-flight resource lost while draining");
            }
        }
    }
}

struct LoopState {
    manager: ConcurrencyManager,
    buffer: ResourceBuffer,
    runs: JoinSet<RunOutcome>,
    summary: RunSummary,
    stopping: bool,
}

/// Everything a pipeline run needs, owned so it can be spawned
struct ScrapeJob<C: Client> {
    project: Project,
    pipeline: Arc<Pipeline<C>>,
    client: Arc<C>,
    stop: watch::Receiver<bool>,
}

struct RunOutcome {
    admission: Admission,
    outcome: ResourceOutcome,
}

enum ResourceOutcome {
    Scraped {
        url: String,
        status: Option<u16>,
        passes: u32,
    },
    Failed {
        url: String,
        status: u16,
        error: String,
    },
}

/// Runs one admitted resource, turning a panic into a failed outcome
async fn run_resource<C: Client>(
    job: ScrapeJob<C>,
    resource: Resource,
    admission: Admission,
) -> RunOutcome {
    let url = resource.url.to_string();
    let entry_id = resource.queue_entry_id;
    let queue = job.project.queue.clone();

    let outcome = match tokio::spawn(scrape(job, resource).in_current_span()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let err = CrawlError::StepPanicked { url: url.clone() };
            tracing::warn!(url = %url, error = %e, "Pipeline run panicked");
            let status = err.queue_status();
            mark(queue.as_ref(), entry_id, QueueStatus::Terminal(status)).await;
            ResourceOutcome::Failed {
                url,
                status,
                error: err.to_string(),
            }
        }
    };

    RunOutcome { admission, outcome }
}

/// Runs pipeline passes until the resource stops yielding new actions
async fn scrape<C: Client>(mut job: ScrapeJob<C>, mut resource: Resource) -> ResourceOutcome {
    let mut captured = Content::new();
    let mut redirects = RedirectChain::new(&resource.url);
    let mut passes = 0u32;

    let result = loop {
        let actions_before = resource.actions.len();
        match run_pass(&job, &mut resource, &mut captured, &mut redirects).await {
            Err(e) => break Err(e),
            Ok(PassEnd::KnownTarget) => {
                passes += 1;
                break Ok(());
            }
            Ok(PassEnd::Completed) => {
                passes += 1;
                if resource.actions.len() <= actions_before || *job.stop.borrow_and_update() {
                    break Ok(());
                }
                tracing::debug!(actions = ?resource.actions, "Re-entering dynamic resource");
                resource = resource.derive_for_reentry();
            }
        }
    };

    let url = resource.url.to_string();
    match result {
        Ok(()) => {
            mark(
                job.project.queue.as_ref(),
                resource.queue_entry_id,
                QueueStatus::scraped(resource.status),
            )
            .await;
            ResourceOutcome::Scraped {
                url,
                status: resource.status,
                passes,
            }
        }
        Err(e) => {
            let status = e.queue_status();
            tracing::warn!(url = %url, status, error = %e, "Resource failed");
            mark(
                job.project.queue.as_ref(),
                resource.queue_entry_id,
                QueueStatus::Terminal(status),
            )
            .await;
            ResourceOutcome::Failed {
                url,
                status,
                error: e.to_string(),
            }
        }
    }
}

enum PassEnd {
    Completed,

    /// Redirected to a URL someone else owns; the stub is all that is recorded
    KnownTarget,
}

/// Runs every applicable step once, restarting after a followed redirect
async fn run_pass<C: Client>(
    job: &ScrapeJob<C>,
    resource: &mut Resource,
    captured: &mut Content,
    redirects: &mut RedirectChain,
) -> Result<PassEnd> {
    'chain: loop {
        for step in job.pipeline.steps() {
            if !step.test(&job.project, resource) {
                tracing::trace!(step = step.name(), "Step not applicable");
                continue;
            }
            if step.run_in_page() && !job.client.renders_pages() {
                return Err(StepError::Other(anyhow::anyhow!(
                    "step {} must run in a rendered page but the client renders none",
                    step.name()
                ))
                .into());
            }

            let partial = step
                .apply(&job.project, resource, job.client.as_ref())
                .await?;
            let Some(partial) = partial else {
                continue;
            };

            if partial.is_redirect() && !partial.resources_to_add.is_empty() {
                match follow_redirect(&job.project, resource, partial, redirects).await? {
                    Redirect::Restart => continue 'chain,
                    Redirect::KnownTarget => return Ok(PassEnd::KnownTarget),
                }
            }

            resource.apply(partial, captured);
        }

        return Ok(PassEnd::Completed);
    }
}

enum Redirect {
    Restart,
    KnownTarget,
}

/// URLs visited by one resource's redirect chain
struct RedirectChain {
    start: String,
    visited: HashSet<String>,
    hops: u32,
}

impl RedirectChain {
    fn new(start: &Url) -> Self {
        Self {
            start: start.to_string(),
            visited: HashSet::from([start.to_string()]),
            hops: 0,
        }
    }

    fn hop(&mut self, target: &Url) -> Result<()> {
        self.hops += 1;
        if self.hops > MAX_REDIRECTS {
            return Err(CrawlError::RedirectLimit {
                url: self.start.clone(),
            });
        }
        if !self.visited.insert(target.to_string()) {
            return Err(CrawlError::RedirectLoop {
                url: target.to_string(),
            });
        }
        Ok(())
    }
}

/// Records the redirecting URL as a finished stub and re-points the resource
///
/// The target is claimed for this run by inserting it in progress. If it is
/// already queued, its owner scrapes it and this resource ends here.
async fn follow_redirect(
    project: &Project,
    resource: &mut Resource,
    partial: PartialResource,
    chain: &mut RedirectChain,
) -> Result<Redirect> {
    let status = partial.status.unwrap_or(302);
    let location = &partial.resources_to_add[0].url;
    let target = resolve_link(location, &resource.url)
        .ok_or_else(|| UrlError::Malformed(location.clone()))?;
    chain.hop(&target)?;

    tracing::debug!(from = %resource.url, to = %target, status, "Following redirect");

    let stub = QueueStatus::Terminal(status);
    match resource.queue_entry_id {
        Some(id) => project.queue.update_status(id, stub).await?,
        None => {
            project
                .queue
                .add(&[NewQueueEntry::eligible(resource.url.as_str(), resource.depth)
                    .with_status(stub)])
                .await?;
        }
    }

    let inserted = project
        .queue
        .add(&[NewQueueEntry::in_progress(
            target.as_str(),
            resource.depth,
            resource.parent.clone(),
        )])
        .await?;

    let Some(entry) = inserted.first() else {
        tracing::debug!(url = %target, "Redirect target already queued");
        resource.status = Some(status);
        return Ok(Redirect::KnownTarget);
    };

    resource.queue_entry_id = Some(entry.id);
    resource.url = target;
    resource.status = None;
    resource.content_type = None;
    resource.data = None;
    resource.resources_to_add.clear();
    Ok(Redirect::Restart)
}

/// Sets a queue entry's status, logging rather than failing the resource
async fn mark(queue: &dyn WorkQueue, entry_id: Option<i64>, status: QueueStatus) {
    let Some(id) = entry_id else {
        return;
    };
    if let Err(e) = queue.update_status(id, status).await {
        tracing::warn!(entry_id = id, %status, error = %e, "Failed to update queue entry");
    }
}
