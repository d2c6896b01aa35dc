//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the [`WorkQueue`] and
//! [`ResourceStore`] traits. Several crawler processes may open the same file.

use crate::resource::Resource;
use crate::state::{QueueStatus, IN_PROGRESS_STATUS};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ResourceStore, StorageError, StorageResult, WorkQueue};
use crate::storage::{NewQueueEntry, QueueEntry, StoredResource};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const QUEUE_COLUMNS: &str = "id, url, depth, status, parent";

const RESOURCE_COLUMNS: &str =
    "queue_entry_id, url, depth, status, content_type, content, data, actions, parent, scraped_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        // Other crawler processes hold the write lock while claiming
        conn.busy_timeout(Duration::from_secs(5))?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Looks up a queue entry by URL
    pub fn find_entry(&self, url: &str) -> StorageResult<Option<QueueEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM queue WHERE url = ?1", QUEUE_COLUMNS),
                params![url],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Number of queue entries per status, eligible and in-progress first
    pub fn status_counts(&self) -> StorageResult<Vec<(QueueStatus, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM queue GROUP BY status ORDER BY status IS NOT NULL, status",
        )?;
        let counts = stmt
            .query_map([], |row| {
                let status: Option<i64> = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((QueueStatus::from_db_value(status), count as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Deletes every queue entry and stored resource
    pub fn clear(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("DELETE FROM resources; DELETE FROM queue;")?;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for SqliteStorage {
    async fn claim(&self, limit: usize) -> StorageResult<Vec<QueueEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front so two processes cannot
        // select the same eligible rows
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut entries = {
            let mut stmt = tx.prepare(&format!(
                "UPDATE queue SET status = ?1
                 WHERE id IN (
                     SELECT id FROM queue WHERE status IS NULL ORDER BY depth, id LIMIT ?2
                 )
                 RETURNING {}",
                QUEUE_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![IN_PROGRESS_STATUS as i64, limit as i64],
                row_to_entry,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.commit()?;

        entries.sort_by_key(|e| (e.depth, e.id));
        Ok(entries)
    }

    async fn add(&self, entries: &[NewQueueEntry]) -> StorageResult<Vec<QueueEntry>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = Vec::new();

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO queue (url, depth, status, parent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in entries {
                let parent = entry
                    .parent
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                let changed = stmt.execute(params![
                    entry.url,
                    entry.depth,
                    entry.status.to_db_value(),
                    parent,
                    now
                ])?;
                if changed == 1 {
                    inserted.push(QueueEntry {
                        id: tx.last_insert_rowid(),
                        url: entry.url.clone(),
                        depth: entry.depth,
                        status: entry.status,
                        parent: entry.parent.clone(),
                    });
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    async fn update_status(&self, id: i64, status: QueueStatus) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE queue SET status = ?1 WHERE id = ?2",
            params![status.to_db_value(), id],
        )?;
        Ok(())
    }

    async fn count(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ResourceStore for SqliteStorage {
    async fn save_resource(&self, resource: &Resource) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let newer = StoredResource::from_resource(resource);
        let existing = load_resource(&tx, &newer.url)?;
        let record = match existing {
            Some(mut record) => {
                record.absorb(newer);
                record
            }
            None => newer,
        };

        let parent = record
            .parent
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            "INSERT INTO resources
                (queue_entry_id, url, depth, status, content_type, content, data, actions, parent, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(url) DO UPDATE SET
                queue_entry_id = excluded.queue_entry_id,
                depth = excluded.depth,
                status = excluded.status,
                content_type = excluded.content_type,
                content = excluded.content,
                data = excluded.data,
                actions = excluded.actions,
                parent = excluded.parent,
                scraped_at = excluded.scraped_at",
            params![
                record.queue_entry_id,
                record.url,
                record.depth,
                record.status,
                record.content_type,
                serde_json::to_string(&record.content)?,
                record.data,
                serde_json::to_string(&record.actions)?,
                parent,
                record.scraped_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn load_resource(&self, url: &str) -> StorageResult<Option<StoredResource>> {
        let conn = self.conn()?;
        load_resource(&conn, url)
    }

    async fn count_resources(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn load_resource(conn: &Connection, url: &str) -> StorageResult<Option<StoredResource>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM resources WHERE url = ?1", RESOURCE_COLUMNS),
            params![url],
            |row| {
                Ok(StoredResource {
                    queue_entry_id: row.get(0)?,
                    url: row.get(1)?,
                    depth: row.get(2)?,
                    status: row.get(3)?,
                    content_type: row.get(4)?,
                    content: json_column(row, 5)?,
                    data: row.get(6)?,
                    actions: json_column(row, 7)?,
                    parent: optional_json_column(row, 8)?,
                    scraped_at: row.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.get(0)?,
        url: row.get(1)?,
        depth: row.get(2)?,
        status: QueueStatus::from_db_value(row.get(3)?),
        parent: optional_json_column(row, 4)?,
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
