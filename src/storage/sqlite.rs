//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the AssetStore trait.

use crate::state::AssetStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{AssetStore, StorageError, StorageResult};
use crate::storage::{AssetRecord, BatchRecord, BatchStatus, StatusUpdate};
use crate::url::normalize_url;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const ASSET_COLUMNS: &str =
    "id, url, status, remote_id, local_artifact_name, last_error, created_at, updated_at";

const BATCH_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, worker_count,
     completed_count, failed_count";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn current_status(&self, url: &str) -> StorageResult<Option<AssetStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM assets WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;

        status
            .map(|s| AssetStatus::from_db_string(&s).ok_or(StorageError::UnknownStatus(s)))
            .transpose()
    }
}

fn canonical_url(url: &str) -> StorageResult<String> {
    normalize_url(url)
        .map(|u| u.to_string())
        .map_err(|e| StorageError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

/// Moves every in-flight asset back to PENDING
fn reset_in_flight(conn: &Connection, now: &str) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "UPDATE assets SET status = ?1, updated_at = ?2 WHERE status IN ({})",
            status_list(AssetStatus::Pending.allowed_predecessors())
        ),
        params![AssetStatus::Pending.to_db_string(), now],
    )
}

fn status_list(statuses: &[AssetStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.to_db_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<AssetRecord> {
    Ok(AssetRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        status: AssetStatus::from_db_string(&row.get::<_, String>(2)?)
            .unwrap_or(AssetStatus::Failed),
        remote_id: row.get(3)?,
        local_artifact_name: row.get(4)?,
        last_error: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<BatchRecord> {
    Ok(BatchRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: BatchStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(BatchStatus::Interrupted),
        worker_count: row.get(5)?,
        completed_count: row.get(6)?,
        failed_count: row.get(7)?,
    })
}

impl AssetStore for SqliteStorage {
    // ===== Asset Insertion =====

    fn insert_asset(&mut self, url: &str) -> StorageResult<bool> {
        let url = canonical_url(url)?;
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO assets (url, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![url, AssetStatus::Pending.to_db_string(), now],
        )?;
        Ok(changed > 0)
    }

    fn bulk_insert_new(&mut self, urls: &[String]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut added = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO assets (url, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
            )?;

            for raw in urls {
                let url = match canonical_url(raw) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::warn!("Skipping seed URL: {}", e);
                        continue;
                    }
                };
                added += stmt.execute(params![url, AssetStatus::Pending.to_db_string(), now])?;
            }
        }

        tx.commit()?;
        Ok(added)
    }

    // ===== Asset Lookup =====

    fn get_asset(&self, url: &str) -> StorageResult<Option<AssetRecord>> {
        // An unparseable URL was never stored
        let Ok(url) = canonical_url(url) else {
            return Ok(None);
        };
        let asset = self
            .conn
            .query_row(
                &format!("SELECT {} FROM assets WHERE url = ?1", ASSET_COLUMNS),
                params![url],
                asset_from_row,
            )
            .optional()?;

        Ok(asset)
    }

    fn get_status(&self, url: &str) -> StorageResult<Option<AssetStatus>> {
        let Ok(url) = canonical_url(url) else {
            return Ok(None);
        };
        self.current_status(&url)
    }

    fn eligible_urls(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT url FROM assets WHERE status IN ({}) ORDER BY created_at, id",
            status_list(&[AssetStatus::Pending, AssetStatus::Failed])
        ))?;

        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(urls)
    }

    // ===== Status Transitions =====

    fn update_status(
        &mut self,
        url: &str,
        status: AssetStatus,
        update: &StatusUpdate,
    ) -> StorageResult<()> {
        let url = canonical_url(url)?;
        if status == AssetStatus::Completed && update.remote_id.is_none() {
            return Err(StorageError::MissingRemoteId(url));
        }

        let last_error = if status == AssetStatus::Failed {
            update.last_error.as_deref()
        } else {
            None
        };

        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            &format!(
                "UPDATE assets SET status = ?1,
                    remote_id = COALESCE(?2, remote_id),
                    local_artifact_name = COALESCE(?3, local_artifact_name),
                    last_error = ?4,
                    updated_at = ?5
                 WHERE url = ?6 AND status IN ({})",
                status_list(status.allowed_predecessors())
            ),
            params![
                status.to_db_string(),
                update.remote_id,
                update.local_artifact_name,
                last_error,
                now,
                url
            ],
        )?;

        if changed == 0 {
            return match self.current_status(&url)? {
                None => Err(StorageError::AssetNotFound(url)),
                Some(from) => Err(StorageError::InvalidTransition {
                    url,
                    from,
                    to: status,
                }),
            };
        }

        Ok(())
    }

    fn reset_stale(&mut self) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        let reset = reset_in_flight(&tx, &now)?;

        let interrupted = tx.execute(
            "UPDATE batches SET status = ?1, finished_at = ?2 WHERE status = ?3",
            params![
                BatchStatus::Interrupted.to_db_string(),
                now,
                BatchStatus::Running.to_db_string()
            ],
        )?;

        tx.commit()?;

        if interrupted > 0 {
            tracing::warn!("Marked {} leftover running batch(es) as interrupted", interrupted);
        }

        Ok(reset)
    }

    fn reset_stale_assets(&mut self) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        Ok(reset_in_flight(&self.conn, &now)?)
    }

    // ===== Statistics =====

    fn status_counts(&self) -> StorageResult<HashMap<AssetStatus, u64>> {
        let mut counts: HashMap<AssetStatus, u64> = AssetStatus::all_statuses()
            .into_iter()
            .map(|s| (s, 0))
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM assets GROUP BY status")?;

        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;

        for row in rows {
            let (status, count) = row?;
            match AssetStatus::from_db_string(&status) {
                Some(status) => {
                    counts.insert(status, count as u64);
                }
                None => tracing::warn!("Ignoring {} assets with unknown status {}", count, status),
            }
        }

        Ok(counts)
    }

    fn total_count(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Maintenance =====

    fn purge_failed(&mut self, patterns: &[String]) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;

        {
            let mut stmt = tx.prepare(
                "DELETE FROM assets WHERE status = ?1 AND instr(COALESCE(last_error, ''), ?2) > 0",
            )?;
            for pattern in patterns.iter().filter(|p| !p.is_empty()) {
                deleted += stmt.execute(params![AssetStatus::Failed.to_db_string(), pattern])?;
            }
        }

        tx.commit()?;
        Ok(deleted)
    }

    // ===== Batch Ledger =====

    fn begin_batch(&mut self, config_hash: &str, worker_count: usize) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let result = self.conn.execute(
            "INSERT INTO batches (started_at, config_hash, status, worker_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                now,
                config_hash,
                BatchStatus::Running.to_db_string(),
                worker_count
            ],
        );

        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                let running: i64 = self.conn.query_row(
                    "SELECT id FROM batches WHERE status = ?1",
                    params![BatchStatus::Running.to_db_string()],
                    |row| row.get(0),
                )?;
                Err(StorageError::BatchInProgress(running))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finish_batch(
        &mut self,
        batch_id: i64,
        completed: usize,
        failed: usize,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE batches SET status = ?1, finished_at = ?2, completed_count = ?3,
             failed_count = ?4 WHERE id = ?5",
            params![
                BatchStatus::Completed.to_db_string(),
                now,
                completed,
                failed,
                batch_id
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::BatchNotFound(batch_id));
        }
        Ok(())
    }

    fn interrupt_batch(&mut self, batch_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE batches SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![BatchStatus::Interrupted.to_db_string(), now, batch_id],
        )?;

        if changed == 0 {
            return Err(StorageError::BatchNotFound(batch_id));
        }
        Ok(())
    }

    fn get_batch(&self, batch_id: i64) -> StorageResult<BatchRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM batches WHERE id = ?1", BATCH_COLUMNS),
                params![batch_id],
                batch_from_row,
            )
            .optional()?
            .ok_or(StorageError::BatchNotFound(batch_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with(urls: &[&str]) -> SqliteStorage {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        storage.bulk_insert_new(&urls).unwrap();
        storage
    }

    fn walk_to(storage: &mut SqliteStorage, url: &str, target: AssetStatus) {
        let path = [
            AssetStatus::Extracting,
            AssetStatus::Downloading,
            AssetStatus::Uploading,
        ];
        for status in path {
            storage
                .update_status(url, status, &StatusUpdate::default())
                .unwrap();
            if status == target {
                return;
            }
        }
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStorage::new_in_memory().is_ok());
    }

    #[test]
    fn test_bulk_insert_deduplicates() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let urls = vec![
            "https://site.test/a".to_string(),
            "https://site.test/a".to_string(),
            "https://site.test/b".to_string(),
        ];

        assert_eq!(storage.bulk_insert_new(&urls).unwrap(), 2);
        assert_eq!(storage.total_count().unwrap(), 2);

        // Second run adds nothing
        assert_eq!(storage.bulk_insert_new(&urls).unwrap(), 0);
        assert_eq!(storage.total_count().unwrap(), 2);
    }

    #[test]
    fn test_insert_normalizes_case_and_fragment() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        assert!(storage.insert_asset("https://Site.TEST/clip/#player").unwrap());
        assert!(!storage.insert_asset("https://site.test/clip/").unwrap());
        assert_eq!(
            storage.get_status("https://site.test/clip/").unwrap(),
            Some(AssetStatus::Pending)
        );
    }

    #[test]
    fn test_bulk_insert_skips_unparseable() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let urls = vec!["not a url".to_string(), "https://site.test/a/".to_string()];
        assert_eq!(storage.bulk_insert_new(&urls).unwrap(), 1);
    }

    #[test]
    fn test_full_lifecycle() {
        let url = "https://site.test/a/";
        let mut storage = storage_with(&[url]);

        walk_to(&mut storage, url, AssetStatus::Downloading);
        storage
            .update_status(
                url,
                AssetStatus::Uploading,
                &StatusUpdate::default().with_local_artifact_name("abc.mp4"),
            )
            .unwrap();
        storage
            .update_status(
                url,
                AssetStatus::Completed,
                &StatusUpdate::default().with_remote_id("guid-1"),
            )
            .unwrap();

        let asset = storage.get_asset(url).unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::Completed);
        assert_eq!(asset.remote_id.as_deref(), Some("guid-1"));
        assert_eq!(asset.local_artifact_name.as_deref(), Some("abc.mp4"));
        assert_eq!(asset.last_error, None);
    }

    #[test]
    fn test_completed_requires_remote_id() {
        let url = "https://site.test/a/";
        let mut storage = storage_with(&[url]);
        walk_to(&mut storage, url, AssetStatus::Uploading);

        let result = storage.update_status(url, AssetStatus::Completed, &StatusUpdate::default());
        assert!(matches!(result, Err(StorageError::MissingRemoteId(_))));
        assert_eq!(
            storage.get_status(url).unwrap(),
            Some(AssetStatus::Uploading)
        );
    }

    #[test]
    fn test_completed_is_never_overwritten() {
        let url = "https://site.test/a/";
        let mut storage = storage_with(&[url]);
        walk_to(&mut storage, url, AssetStatus::Uploading);
        storage
            .update_status(
                url,
                AssetStatus::Completed,
                &StatusUpdate::default().with_remote_id("guid-1"),
            )
            .unwrap();

        let result = storage.mark_failed(url, "late failure");
        assert!(matches!(
            result,
            Err(StorageError::InvalidTransition {
                from: AssetStatus::Completed,
                to: AssetStatus::Failed,
                ..
            })
        ));

        // Rediscovery is a no-op too
        assert_eq!(storage.bulk_insert_new(&[url.to_string()]).unwrap(), 0);
        assert_eq!(
            storage.get_status(url).unwrap(),
            Some(AssetStatus::Completed)
        );
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let url = "https://site.test/a/";
        let mut storage = storage_with(&[url]);

        let result = storage.update_status(url, AssetStatus::Uploading, &StatusUpdate::default());
        assert!(matches!(result, Err(StorageError::InvalidTransition { .. })));
    }

    #[test]
    fn test_update_unknown_asset() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let result = storage.update_status(
            "https://site.test/missing/",
            AssetStatus::Extracting,
            &StatusUpdate::default(),
        );
        assert!(matches!(result, Err(StorageError::AssetNotFound(_))));
    }

    #[test]
    fn test_mark_failed_records_error_and_retry_clears_it() {
        let url = "https://site.test/a/";
        let mut storage = storage_with(&[url]);
        walk_to(&mut storage, url, AssetStatus::Extracting);

        storage.mark_failed(url, "no player iframe").unwrap();
        let asset = storage.get_asset(url).unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::Failed);
        assert_eq!(asset.last_error.as_deref(), Some("no player iframe"));

        storage
            .update_status(url, AssetStatus::Extracting, &StatusUpdate::default())
            .unwrap();
        let asset = storage.get_asset(url).unwrap().unwrap();
        assert_eq!(asset.last_error, None);
    }

    #[test]
    fn test_reset_stale() {
        let urls = [
            "https://site.test/a/",
            "https://site.test/b/",
            "https://site.test/c/",
            "https://site.test/d/",
        ];
        let mut storage = storage_with(&urls);
        walk_to(&mut storage, urls[0], AssetStatus::Extracting);
        walk_to(&mut storage, urls[1], AssetStatus::Downloading);
        walk_to(&mut storage, urls[2], AssetStatus::Uploading);

        assert_eq!(storage.reset_stale().unwrap(), 3);
        for url in urls {
            assert_eq!(storage.get_status(url).unwrap(), Some(AssetStatus::Pending));
        }

        // Idempotent
        assert_eq!(storage.reset_stale().unwrap(), 0);
        assert_eq!(storage.total_count().unwrap(), 4);
    }

    #[test]
    fn test_eligible_urls() {
        let urls = ["https://site.test/a/", "https://site.test/b/", "https://site.test/c/"];
        let mut storage = storage_with(&urls);
        walk_to(&mut storage, urls[0], AssetStatus::Extracting);
        storage.mark_failed(urls[0], "boom").unwrap();
        walk_to(&mut storage, urls[1], AssetStatus::Downloading);

        let eligible = storage.eligible_urls().unwrap();
        assert_eq!(eligible.len(), 2);
        assert!(eligible.contains(&urls[0].to_string()));
        assert!(eligible.contains(&urls[2].to_string()));
    }

    #[test]
    fn test_status_counts_include_zeroes() {
        let mut storage = storage_with(&["https://site.test/a/", "https://site.test/b/"]);
        walk_to(&mut storage, "https://site.test/a/", AssetStatus::Extracting);

        let counts = storage.status_counts().unwrap();
        assert_eq!(counts.len(), AssetStatus::all_statuses().len());
        assert_eq!(counts[&AssetStatus::Pending], 1);
        assert_eq!(counts[&AssetStatus::Extracting], 1);
        assert_eq!(counts[&AssetStatus::Completed], 0);
    }

    #[test]
    fn test_purge_failed_by_pattern() {
        let urls = ["https://site.test/a/", "https://site.test/b/", "https://site.test/c/"];
        let mut storage = storage_with(&urls);
        for url in &urls[..2] {
            walk_to(&mut storage, url, AssetStatus::Extracting);
        }
        storage
            .mark_failed(urls[0], "No video URLs intercepted after 15s interaction")
            .unwrap();
        storage.mark_failed(urls[1], "relay rejected upload").unwrap();

        let purged = storage
            .purge_failed(&["No video URLs intercepted".to_string(), "Timeout".to_string()])
            .unwrap();

        assert_eq!(purged, 1);
        assert_eq!(storage.get_status(urls[0]).unwrap(), None);
        assert_eq!(storage.get_status(urls[1]).unwrap(), Some(AssetStatus::Failed));
        assert_eq!(storage.get_status(urls[2]).unwrap(), Some(AssetStatus::Pending));
    }

    #[test]
    fn test_second_running_batch_is_rejected() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let first = storage.begin_batch("hash", 2).unwrap();

        let second = storage.begin_batch("hash", 2);
        assert!(matches!(second, Err(StorageError::BatchInProgress(id)) if id == first));

        storage.finish_batch(first, 4, 1).unwrap();
        let batch = storage.get_batch(first).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.completed_count, 4);
        assert_eq!(batch.failed_count, 1);

        assert!(storage.begin_batch("hash", 2).is_ok());
    }

    #[test]
    fn test_reset_stale_interrupts_running_batch() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let batch = storage.begin_batch("hash", 1).unwrap();

        storage.reset_stale().unwrap();

        assert_eq!(
            storage.get_batch(batch).unwrap().status,
            BatchStatus::Interrupted
        );
        assert!(storage.begin_batch("hash", 1).is_ok());
    }

    #[test]
    fn test_asset_reset_leaves_running_batch_alone() {
        let url = "https://site.test/a/";
        let mut storage = storage_with(&[url]);
        walk_to(&mut storage, url, AssetStatus::Downloading);
        let batch = storage.begin_batch("hash", 1).unwrap();

        assert_eq!(storage.reset_stale_assets().unwrap(), 1);
        assert_eq!(storage.get_status(url).unwrap(), Some(AssetStatus::Pending));
        assert_eq!(storage.get_batch(batch).unwrap().status, BatchStatus::Running);
    }

    #[test]
    fn test_interrupt_batch() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let batch = storage.begin_batch("hash", 1).unwrap();

        storage.interrupt_batch(batch).unwrap();

        let record = storage.get_batch(batch).unwrap();
        assert_eq!(record.status, BatchStatus::Interrupted);
        assert!(record.finished_at.is_some());
        assert!(matches!(
            storage.interrupt_batch(99),
            Err(StorageError::BatchNotFound(99))
        ));
    }

    #[test]
    fn test_lookups_use_the_stored_key_form() {
        let mut storage = storage_with(&["https://site.test/a/"]);
        let variant = "https://Site.TEST/a/#player";

        assert_eq!(
            storage.get_status(variant).unwrap(),
            Some(AssetStatus::Pending)
        );
        assert_eq!(
            storage.get_asset(variant).unwrap().unwrap().url,
            "https://site.test/a/"
        );

        storage
            .update_status(variant, AssetStatus::Extracting, &StatusUpdate::default())
            .unwrap();
        assert_eq!(
            storage.get_status("https://site.test/a/").unwrap(),
            Some(AssetStatus::Extracting)
        );

        assert_eq!(storage.get_asset("not a url").unwrap().map(|a| a.id), None);
        assert!(matches!(
            storage.update_status("not a url", AssetStatus::Extracting, &StatusUpdate::default()),
            Err(StorageError::InvalidUrl { .. })
        ));
    }
}
