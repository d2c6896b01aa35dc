//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Ripple-Scrape database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- URLs waiting to be scraped; status NULL means eligible
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    depth INTEGER NOT NULL DEFAULT 0,
    status INTEGER,
    parent TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_claim ON queue(status, depth, id);

-- Scraped resources, one row per URL
CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_entry_id INTEGER REFERENCES queue(id),
    url TEXT NOT NULL UNIQUE,
    depth INTEGER NOT NULL DEFAULT 0,
    status INTEGER,
    content_type TEXT,
    content TEXT NOT NULL DEFAULT '{}',
    data BLOB,
    actions TEXT NOT NULL DEFAULT '[]',
    parent TEXT,
    scraped_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resources_queue_entry ON resources(queue_entry_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
