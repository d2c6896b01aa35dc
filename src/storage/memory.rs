//! In-process work queue and resource store
//!
//! Same contract as the SQLite backend, without durability. Useful for
//! embedding the orchestrator and for tests.

use crate::resource::Resource;
use crate::state::QueueStatus;
use crate::storage::traits::{ResourceStore, StorageError, StorageResult, WorkQueue};
use crate::storage::{NewQueueEntry, QueueEntry, StoredResource};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<i64, QueueEntry>,
    ids_by_url: HashMap<String, i64>,
    next_id: i64,
    resources: HashMap<String, StoredResource>,
}

/// Work queue and resource store held in memory
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Looks up a queue entry by URL
    pub fn find_entry(&self, url: &str) -> StorageResult<Option<QueueEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .ids_by_url
            .get(url)
            .and_then(|id| inner.entries.get(id))
            .cloned())
    }

    /// All entries, in insertion order
    pub fn entries(&self) -> StorageResult<Vec<QueueEntry>> {
        Ok(self.lock()?.entries.values().cloned().collect())
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn claim(&self, limit: usize) -> StorageResult<Vec<QueueEntry>> {
        let mut inner = self.lock()?;

        let mut eligible: Vec<(u32, i64)> = inner
            .entries
            .values()
            .filter(|e| e.status.is_eligible())
            .map(|e| (e.depth, e.id))
            .collect();
        eligible.sort_unstable();
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for (_, id) in eligible {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.status = QueueStatus::InProgress;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn add(&self, entries: &[NewQueueEntry]) -> StorageResult<Vec<QueueEntry>> {
        let mut inner = self.lock()?;
        let mut inserted = Vec::new();

        for new in entries {
            if inner.ids_by_url.contains_key(&new.url) {
                continue;
            }
            inner.next_id += 1;
            let entry = QueueEntry {
                id: inner.next_id,
                url: new.url.clone(),
                depth: new.depth,
                status: new.status,
                parent: new.parent.clone(),
            };
            inner.ids_by_url.insert(entry.url.clone(), entry.id);
            inner.entries.insert(entry.id, entry.clone());
            inserted.push(entry);
        }

        Ok(inserted)
    }

    async fn update_status(&self, id: i64, status: QueueStatus) -> StorageResult<()> {
        let mut inner = self.lock()?;
        match inner.entries.get_mut(&id) {
            Some(entry) => {
                entry.status = status;
                Ok(())
            }
            None => Err(StorageError::Database(format!("no queue entry with id {}", id))),
        }
    }

    async fn count(&self) -> StorageResult<u64> {
        Ok(self.lock()?.entries.len() as u64)
    }
}

#[async_trait]
impl ResourceStore for MemoryQueue {
    async fn save_resource(&self, resource: &Resource) -> StorageResult<()> {
        let newer = StoredResource::from_resource(resource);
        let mut inner = self.lock()?;
        match inner.resources.get_mut(&newer.url) {
            Some(existing) => existing.absorb(newer),
            None => {
                inner.resources.insert(newer.url.clone(), newer);
            }
        }
        Ok(())
    }

    async fn load_resource(&self, url: &str) -> StorageResult<Option<StoredResource>> {
        Ok(self.lock()?.resources.get(url).cloned())
    }

    async fn count_resources(&self) -> StorageResult<u64> {
        Ok(self.lock()?.resources.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_order_and_exclusivity() {
        let queue = MemoryQueue::new();
        queue
            .add(&[
                NewQueueEntry::eligible("https://example.com/deep", 3),
                NewQueueEntry::eligible("https://example.com/", 0),
                NewQueueEntry::eligible("https://example.com/a", 1),
                NewQueueEntry::eligible("https://example.com/b", 1),
            ])
            .await
            .unwrap();

        let first = queue.claim(3).await.unwrap();
        let urls: Vec<&str> = first.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/",
                "https://example.com/a",
                "https://example.com/b"
            ]
        );

        let second = queue.claim(3).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(queue.claim(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_is_insert_if_absent() {
        let queue = MemoryQueue::new();
        let first = queue
            .add(&[NewQueueEntry::eligible("https://example.com/", 0)])
            .await
            .unwrap();
        let second = queue
            .add(&[NewQueueEntry::eligible("https://example.com/", 5)])
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(queue.count().await.unwrap(), 1);
        assert_eq!(
            queue.find_entry("https://example.com/").unwrap().unwrap().depth,
            0
        );
    }

    #[tokio::test]
    async fn test_update_unknown_entry_fails() {
        let queue = MemoryQueue::new();
        let result = queue.update_status(42, QueueStatus::failed()).await;
        assert!(matches!(result, Err(StorageError::Database(_))));
    }

    #[tokio::test]
    async fn test_terminal_entries_stay_out_of_claims() {
        let queue = MemoryQueue::new();
        let added = queue
            .add(&[NewQueueEntry::eligible("https://example.com/", 0)])
            .await
            .unwrap();
        queue
            .update_status(added[0].id, QueueStatus::Terminal(301))
            .await
            .unwrap();

        assert!(queue.claim(10).await.unwrap().is_empty());
    }
}
