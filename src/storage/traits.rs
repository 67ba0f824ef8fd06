//! Storage traits and error types
//!
//! This module defines the trait interface for asset store backends and
//! associated error types.

use crate::state::AssetStatus;
use crate::storage::{AssetRecord, BatchRecord, StatusUpdate};
use rusqlite::ErrorCode;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Invalid status transition for {url}: {from} -> {to}")]
    InvalidTransition {
        url: String,
        from: AssetStatus,
        to: AssetStatus,
    },

    #[error("Cannot complete {0} without a remote id")]
    MissingRemoteId(String),

    #[error("Unparseable asset URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Batch {0} is still running against this store")]
    BatchInProgress(i64),

    #[error("Batch not found: {0}")]
    BatchNotFound(i64),

    #[error("Unknown status in store: {0}")]
    UnknownStatus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Returns true if the store itself is unreachable or unusable
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::ReadOnly
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for asset store backends
///
/// Every write touching one asset is a single statement so that a worker and
/// a concurrent stats reader never observe a half-applied update.
pub trait AssetStore {
    // ===== Asset Insertion =====

    /// Inserts a URL as PENDING; returns false if it was already known
    fn insert_asset(&mut self, url: &str) -> StorageResult<bool>;

    /// Inserts every new URL in one transaction, ignoring known ones
    ///
    /// # Returns
    ///
    /// The number of rows actually added
    fn bulk_insert_new(&mut self, urls: &[String]) -> StorageResult<usize>;

    // ===== Asset Lookup =====

    /// Gets an asset by URL
    fn get_asset(&self, url: &str) -> StorageResult<Option<AssetRecord>>;

    /// Gets the status of an asset, if known
    fn get_status(&self, url: &str) -> StorageResult<Option<AssetStatus>>;

    /// URLs in PENDING or FAILED, oldest first
    fn eligible_urls(&self) -> StorageResult<Vec<String>>;

    // ===== Status Transitions =====

    /// Moves an asset to `status`, applying the payload fields in the same statement
    ///
    /// Fails with `InvalidTransition` if the current status may not move to
    /// `status`, which also protects COMPLETED rows from being overwritten.
    fn update_status(
        &mut self,
        url: &str,
        status: AssetStatus,
        update: &StatusUpdate,
    ) -> StorageResult<()>;

    /// Records a failure with its diagnostic text
    fn mark_failed(&mut self, url: &str, error: &str) -> StorageResult<()> {
        self.update_status(
            url,
            AssetStatus::Failed,
            &StatusUpdate::default().with_last_error(error),
        )
    }

    /// Resets in-flight assets to PENDING and interrupts leftover running batches
    ///
    /// Operator recovery after a crash; reclaims the work of any batch still
    /// marked running, so it must not be called while another process runs one.
    ///
    /// # Returns
    ///
    /// The number of assets reset
    fn reset_stale(&mut self) -> StorageResult<usize>;

    /// Resets in-flight assets to PENDING, leaving the batch ledger untouched
    ///
    /// Only safe for the holder of the running batch.
    fn reset_stale_assets(&mut self) -> StorageResult<usize>;

    // ===== Statistics =====

    /// Counts assets per status; every status is present, zero included
    fn status_counts(&self) -> StorageResult<HashMap<AssetStatus, u64>>;

    /// Gets total asset count
    fn total_count(&self) -> StorageResult<u64>;

    // ===== Maintenance =====

    /// Deletes FAILED assets whose error text contains any of `patterns`
    fn purge_failed(&mut self, patterns: &[String]) -> StorageResult<usize>;

    // ===== Batch Ledger =====

    /// Opens a running batch; fails with `BatchInProgress` if one is already running
    fn begin_batch(&mut self, config_hash: &str, worker_count: usize) -> StorageResult<i64>;

    /// Closes a batch with its final counts
    fn finish_batch(&mut self, batch_id: i64, completed: usize, failed: usize)
        -> StorageResult<()>;

    /// Marks a batch interrupted without counts, e.g. when it failed to start
    fn interrupt_batch(&mut self, batch_id: i64) -> StorageResult<()>;

    /// Gets a batch by ID
    fn get_batch(&self, batch_id: i64) -> StorageResult<BatchRecord>;
}
