//! Events emitted by a scrape run
//!
//! Progress reporters and exporters receive these over a channel supplied by
//! the caller; the orchestrator never depends on who is listening.

use tokio::sync::mpsc;
use tracing::Span;

/// Counts reported when a run ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Resources whose pipeline completed
    pub scraped: u64,

    /// Resources that ended with an error status
    pub failed: u64,
}

/// Something that happened during a scrape run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlEvent {
    /// A resource was admitted and its pipeline started
    ResourceSelected { url: String, proxy: String },

    /// A resource finished all its pipeline passes
    ResourceScraped {
        url: String,
        status: Option<u16>,
        passes: u32,
    },

    /// A resource was aborted; its queue entry holds `status`
    ResourceFailed {
        url: String,
        status: u16,
        error: String,
    },

    /// The run finished normally
    ProjectComplete { project: String, summary: RunSummary },

    /// The run was aborted by a fatal error
    ProjectError { project: String, error: String },
}

/// Per-run logging span and event sink
#[derive(Debug, Clone)]
pub struct CrawlContext {
    span: Span,
    events: Option<mpsc::Sender<CrawlEvent>>,
}

impl CrawlContext {
    pub fn new(project: &str) -> Self {
        Self {
            span: tracing::info_span!("project", project = %project),
            events: None,
        }
    }

    /// Sends events to `sender` in addition to logging
    pub fn with_events(mut self, sender: mpsc::Sender<CrawlEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Delivers an event; a dropped receiver is not an error
    pub async fn emit(&self, event: CrawlEvent) {
        if let Some(sender) = &self.events {
            if sender.send(event).await.is_err() {
                tracing::trace!("Event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers_events() {
        let (tx, mut rx) = mpsc::channel(4);
        let context = CrawlContext::new("books").with_events(tx);

        context
            .emit(CrawlEvent::ProjectError {
                project: "books".to_string(),
                error: "boom".to_string(),
            })
            .await;

        assert!(matches!(
            rx.recv().await,
            Some(CrawlEvent::ProjectError { .. })
        ));
    }

    #[tokio::test]
    async fn test_emit_without_receiver_is_silent() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let context = CrawlContext::new("books").with_events(tx);

        context
            .emit(CrawlEvent::ProjectComplete {
                project: "books".to_string(),
                summary: RunSummary::default(),
            })
            .await;

        CrawlContext::new("quiet")
            .emit(CrawlEvent::ProjectComplete {
                project: "quiet".to_string(),
                summary: RunSummary::default(),
            })
            .await;
    }
}
