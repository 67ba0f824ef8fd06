//! Storage module for persisting asset state
//!
//! This module handles all database operations for the pipeline, including:
//! - SQLite database initialization and schema management
//! - Asset records and their status transitions
//! - Bulk seeding from discovery
//! - Batch tracking and crash recovery

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{AssetStore, StorageError, StorageResult};

use crate::state::AssetStatus;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Diagnostics of failures not worth retrying, removed by the maintenance purge
pub const DEFAULT_PURGE_PATTERNS: &[&str] = &[
    "No video URLs intercepted",
    "404",
    "Navigating to page failed",
    "Timeout",
];

/// Store handle shared between the crawler, the workers and stats readers
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Opens a storage database wrapped for sharing
pub fn open_shared_storage(path: &Path) -> StorageResult<SharedStorage> {
    Ok(Arc::new(Mutex::new(open_storage(path)?)))
}

/// Locks the shared store, recovering the guard if a holder panicked
pub fn lock_storage(storage: &SharedStorage) -> MutexGuard<'_, SqliteStorage> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Represents an asset in the database
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub id: i64,
    pub url: String,
    pub status: AssetStatus,
    pub remote_id: Option<String>,
    pub local_artifact_name: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Optional payload fields written together with a status change
///
/// Unset fields leave the stored value untouched, except `last_error`, which
/// only survives on FAILED.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub remote_id: Option<String>,
    pub local_artifact_name: Option<String>,
    pub last_error: Option<String>,
}

impl StatusUpdate {
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    pub fn with_local_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.local_artifact_name = Some(name.into());
        self
    }

    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// Represents a processing batch
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: BatchStatus,
    pub worker_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
}

/// Status of a processing batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Running,
    Completed,
    Interrupted,
}

impl BatchStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }
}
