//! Storage traits and error types
//!
//! The orchestrator only talks to storage through these two traits, so a
//! project can run against the durable SQLite backend or the in-process queue.

use crate::resource::Resource;
use crate::state::QueueStatus;
use crate::storage::{NewQueueEntry, QueueEntry, StoredResource};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable store of URLs waiting to be scraped
///
/// Several crawler processes may share one queue. Implementations must make
/// `claim` atomic: an entry handed to one caller is never handed to another
/// until its status is set back to eligible.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Marks up to `limit` eligible entries as in progress and returns them
    ///
    /// Entries are returned shallowest first, then in insertion order.
    async fn claim(&self, limit: usize) -> StorageResult<Vec<QueueEntry>>;

    /// Inserts entries whose URL is not queued yet
    ///
    /// # Returns
    ///
    /// Only the entries that were actually inserted; duplicates are ignored.
    async fn add(&self, entries: &[NewQueueEntry]) -> StorageResult<Vec<QueueEntry>>;

    /// Sets the status of one entry
    async fn update_status(&self, id: i64, status: QueueStatus) -> StorageResult<()>;

    /// Total number of entries in the queue
    async fn count(&self) -> StorageResult<u64>;
}

/// Persistence for scraped resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Inserts or updates the resource stored under its URL
    ///
    /// Content rows are appended to what was stored before, so re-entered
    /// dynamic resources accumulate everything captured across passes.
    async fn save_resource(&self, resource: &Resource) -> StorageResult<()>;

    /// Loads a stored resource by URL
    async fn load_resource(&self, url: &str) -> StorageResult<Option<StoredResource>>;

    /// Number of stored resources
    async fn count_resources(&self) -> StorageResult<u64>;
}
