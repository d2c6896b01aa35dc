//! Local work buffer between the work queue and the scrape loop
//!
//! Claims resources from the work queue in batches and hands them out one at a
//! time. Everything held here is already marked in progress in the queue, so
//! the buffer is kept small enough that other crawler processes are not
//! starved of work.

use crate::resource::Resource;
use crate::state::QueueStatus;
use crate::storage::WorkQueue;
use crate::{CrawlError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Batches claims against the work queue
#[derive(Clone)]
pub struct ResourceBuffer {
    queue: Arc<dyn WorkQueue>,
    capacity: usize,
    resources: Arc<Mutex<VecDeque<Resource>>>,

    /// Held for the duration of a refill
    refill_lock: Arc<Mutex<()>>,

    /// Error from a detached refill, raised by the next `get_resource`
    last_error: Arc<Mutex<Option<String>>>,

    /// Set once buffered work was released; later refills claim nothing
    released: Arc<AtomicBool>,
}

impl ResourceBuffer {
    pub fn new(queue: Arc<dyn WorkQueue>, capacity: usize) -> Self {
        Self {
            queue,
            capacity: capacity.max(1),
            resources: Arc::new(Mutex::new(VecDeque::new())),
            refill_lock: Arc::new(Mutex::new(())),
            last_error: Arc::new(Mutex::new(None)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Buffer capacity for a project: twice its concurrency, at least `min`
    pub fn capacity_for(project_max_requests: Option<u32>, min: usize) -> usize {
        let doubled = project_max_requests
            .map(|max| (max as usize).saturating_mul(2))
            .unwrap_or(0);
        doubled.max(min)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.resources.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.resources.lock().await.is_empty()
    }

    /// Claims enough entries to fill the buffer
    ///
    /// Returns immediately if another refill is in progress. Failures are
    /// stored and raised by the next call to [`get_resource`](Self::get_resource).
    pub async fn refill(&self) {
        let Ok(_guard) = self.refill_lock.try_lock() else {
            tracing::trace!("Refill already in progress");
            return;
        };
        self.refill_locked().await;
    }

    /// Returns the next buffered resource
    ///
    /// With `stop` set, every buffered resource is released back to the queue
    /// and None is returned. Otherwise a stored refill error is raised, and a
    /// refill is started when the buffer is below half capacity: awaited when
    /// the buffer is empty, detached otherwise.
    pub async fn get_resource(&self, stop: bool) -> Result<Option<Resource>> {
        if stop {
            self.release_all().await?;
            return Ok(None);
        }

        self.raise_refill_error().await?;

        let len = self.len().await;
        if len == 0 || len < self.capacity / 2 {
            if len == 0 {
                // Wait out a detached refill rather than report an empty buffer
                let guard = self.refill_lock.lock().await;
                self.refill_locked().await;
                drop(guard);
                self.raise_refill_error().await?;
            } else {
                let buffer = self.clone();
                tokio::spawn(async move { buffer.refill().await });
            }
        }

        Ok(self.resources.lock().await.pop_front())
    }

    /// Puts a resource back at the end of the buffer
    ///
    /// Used when admission rejects a resource; it stays claimed.
    pub async fn requeue(&self, mut resource: Resource) {
        resource.proxy = None;
        self.resources.lock().await.push_back(resource);
    }

    /// Sets every buffered resource back to eligible in the work queue
    ///
    /// Refills that have not started yet, detached ones included, become no-ops.
    async fn release_all(&self) -> Result<()> {
        let _guard = self.refill_lock.lock().await;
        self.released.store(true, Ordering::SeqCst);
        let drained: Vec<Resource> = self.resources.lock().await.drain(..).collect();

        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Releasing buffered resources");
        }
        for resource in drained {
            if let Some(id) = resource.queue_entry_id {
                self.queue.update_status(id, QueueStatus::Eligible).await?;
            }
        }
        Ok(())
    }

    async fn refill_locked(&self) {
        if self.released.load(Ordering::SeqCst) {
            tracing::trace!("Buffer released, skipping refill");
            return;
        }

        let wanted = self.capacity.saturating_sub(self.len().await);
        if wanted == 0 {
            return;
        }

        let entries = match self.queue.claim(wanted).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "Work queue refill failed");
                *self.last_error.lock().await = Some(e.to_string());
                return;
            }
        };

        tracing::debug!(claimed = entries.len(), wanted, "Refilled buffer");

        let mut claimed = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.to_resource() {
                Ok(resource) => claimed.push(resource),
                Err(e) => {
                    tracing::warn!(url = %entry.url, error = %e, "Dropping unparsable queue entry");
                    if let Err(e) = self.queue.update_status(entry.id, QueueStatus::failed()).await
                    {
                        *self.last_error.lock().await = Some(e.to_string());
                    }
                }
            }
        }

        self.resources.lock().await.extend(claimed);
    }

    async fn raise_refill_error(&self) -> Result<()> {
        match self.last_error.lock().await.take() {
            Some(message) => Err(CrawlError::Refill(message)),
            None => Ok(()),
        }
    }
}
