//! Ripple-Scrape: a rate-limited, queue-backed scraping engine
//!
//! This crate pulls resources from a shared work queue, admits them through four
//! levels of concurrency limits (project, proxy, domain, session), runs each one
//! through an ordered pipeline of steps and persists the outcome. Several crawler
//! processes may share one queue database.

pub mod config;
pub mod crawler;
pub mod resource;
pub mod state;
pub mod steps;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for run-level failures
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Work queue refill failed: {0}")]
    Refill(String),

    #[error("Invalid concurrency settings: {0}")]
    InvalidConcurrency(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Pipeline run for {url} panicked")]
    StepPanicked { url: String },

    #[error("Too many redirects from {url}")]
    RedirectLimit { url: String },

    #[error("Redirect loop detected at {url}")]
    RedirectLoop { url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Terminal queue status recorded for a resource that failed with this error
    pub fn queue_status(&self) -> u16 {
        match self {
            Self::Step(e) => e.queue_status(),
            _ => state::GENERIC_ERROR_STATUS,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown pipeline step: {0}")]
    UnknownStep(String),

    #[error("Invalid options for step {step}: {message}")]
    StepOptions { step: String, message: String },
}

/// Errors raised by a single pipeline step while processing one resource
///
/// These never abort a run: the orchestrator records them on the resource's
/// queue entry and carries on with other resources.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("Transport error for {url}: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// The terminal status to record on the queue entry
    pub fn queue_status(&self) -> u16 {
        match self {
            Self::Status { status, .. } => *status,
            _ => state::GENERIC_ERROR_STATUS,
        }
    }
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

/// Result type alias for pipeline step operations
pub type StepResult<T> = std::result::Result<T, StepError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlEvent, Orchestrator, RunSummary, StopHandle};
pub use resource::{Content, PartialResource, Proxy, Resource};
pub use state::{AdmissionLevel, QueueStatus};
pub use url::{extract_domain, normalize_url};
