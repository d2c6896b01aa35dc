//! Storage module for the work queue and scraped resources
//!
//! This module handles all persistence for a scrape project, including:
//! - SQLite database initialization and schema management
//! - Atomic claiming of queue entries, safe across processes
//! - Resource persistence with content accumulated across dynamic passes
//! - An in-process queue with the same contract

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryQueue;
pub use sqlite::SqliteStorage;
pub use traits::{ResourceStore, StorageError, StorageResult, WorkQueue};

use crate::resource::{Content, Parent, Resource, ResourceStub};
use crate::state::QueueStatus;
use std::path::Path;
use url::Url;

/// Opens (creating if needed) the SQLite database at `path`
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to open the database or create the schema
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// A row of the work queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub url: String,
    pub depth: u32,
    pub status: QueueStatus,
    pub parent: Option<Parent>,
}

impl QueueEntry {
    /// Builds the in-memory resource this entry stands for
    pub fn to_resource(&self) -> Result<Resource, url::ParseError> {
        let url = Url::parse(&self.url)?;
        let mut resource = Resource::new(url, self.depth);
        resource.queue_entry_id = Some(self.id);
        resource.parent = self.parent.clone();
        Ok(resource)
    }
}

/// A URL to insert into the work queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueEntry {
    pub url: String,
    pub depth: u32,
    pub parent: Option<Parent>,
    pub status: QueueStatus,
}

impl NewQueueEntry {
    /// An entry any crawler may claim
    pub fn eligible(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            depth,
            parent: None,
            status: QueueStatus::Eligible,
        }
    }

    /// An entry already owned by the caller, e.g. a redirect target being scraped
    pub fn in_progress(url: impl Into<String>, depth: u32, parent: Option<Parent>) -> Self {
        Self {
            url: url.into(),
            depth,
            parent,
            status: QueueStatus::InProgress,
        }
    }

    pub fn with_status(mut self, status: QueueStatus) -> Self {
        self.status = status;
        self
    }
}

impl From<&ResourceStub> for NewQueueEntry {
    fn from(stub: &ResourceStub) -> Self {
        Self {
            url: stub.url.clone(),
            depth: stub.depth,
            parent: stub.parent.clone(),
            status: QueueStatus::Eligible,
        }
    }
}

/// A resource as persisted by a [`ResourceStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    pub queue_entry_id: Option<i64>,
    pub url: String,
    pub depth: u32,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub content: Content,
    pub data: Option<Vec<u8>>,
    pub actions: Vec<String>,
    pub parent: Option<Parent>,
    pub scraped_at: String,
}

impl StoredResource {
    /// Snapshot of `resource`, stamped with the current time
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            queue_entry_id: resource.queue_entry_id,
            url: resource.url.to_string(),
            depth: resource.depth,
            status: resource.status,
            content_type: resource.content_type.clone(),
            content: resource.content.clone(),
            data: resource.data.clone(),
            actions: resource.actions.clone(),
            parent: resource.parent.clone(),
            scraped_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Folds a later save of the same URL into this record
    ///
    /// Scalars take the newer value, data is only replaced when the newer
    /// save carries some, content rows are appended.
    pub fn absorb(&mut self, newer: StoredResource) {
        self.queue_entry_id = newer.queue_entry_id.or(self.queue_entry_id);
        self.depth = newer.depth;
        self.status = newer.status.or(self.status);
        self.content_type = newer.content_type.or(self.content_type.take());
        self.content.append(&newer.content);
        if newer.data.is_some() {
            self.data = newer.data;
        }
        self.actions = newer.actions;
        self.parent = newer.parent.or(self.parent.take());
        self.scraped_at = newer.scraped_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_to_resource() {
        let entry = QueueEntry {
            id: 7,
            url: "https://example.com/page".to_string(),
            depth: 2,
            status: QueueStatus::InProgress,
            parent: Some(Parent {
                link_text: Some("Page".to_string()),
                title: None,
            }),
        };

        let resource = entry.to_resource().unwrap();
        assert_eq!(resource.url.as_str(), "https://example.com/page");
        assert_eq!(resource.depth, 2);
        assert_eq!(resource.queue_entry_id, Some(7));
        assert_eq!(resource.parent, entry.parent);
    }

    #[test]
    fn test_new_entry_from_stub() {
        let stub = ResourceStub::new("https://example.com/a", 3);
        let entry = NewQueueEntry::from(&stub);
        assert_eq!(entry.depth, 3);
        assert_eq!(entry.status, QueueStatus::Eligible);
    }

    #[test]
    fn test_absorb_appends_content() {
        let mut resource = Resource::new(Url::parse("https://example.com/").unwrap(), 0);
        resource.status = Some(200);
        resource.data = Some(b"<html>".to_vec());
        resource.content = [("h1", vec!["A".to_string()])].into_iter().collect();
        let mut stored = StoredResource::from_resource(&resource);

        resource.content = [("h1", vec!["A2".to_string()])].into_iter().collect();
        resource.data = None;
        resource.actions = vec!["scroll#1".to_string()];
        stored.absorb(StoredResource::from_resource(&resource));

        assert_eq!(
            stored.content.get("h1"),
            Some(&["A".to_string(), "A2".to_string()][..])
        );
        assert_eq!(stored.data.as_deref(), Some(&b"<html>"[..]));
        assert_eq!(stored.actions, vec!["scroll#1".to_string()]);
    }
}
