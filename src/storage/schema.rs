//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the asset store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per discovered asset page
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'PENDING',
    remote_id TEXT,
    local_artifact_name TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (status <> 'COMPLETED' OR remote_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_assets_status ON assets(status);

-- Track processing batches
CREATE TABLE IF NOT EXISTS batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    worker_count INTEGER NOT NULL,
    completed_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0
);

-- At most one running batch per store
CREATE UNIQUE INDEX IF NOT EXISTS idx_batches_single_running
    ON batches(status) WHERE status = 'running';
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
