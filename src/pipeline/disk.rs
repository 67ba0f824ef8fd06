//! Disk-space admission and local artifact cleanup

use crate::config::PipelineConfig;
use crate::{HarvestError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Free space in megabytes on the filesystem holding `path`
pub fn available_mb(path: &Path) -> std::io::Result<u64> {
    fs2::available_space(path).map(|bytes| bytes / BYTES_PER_MB)
}

/// Admits an asset only while the artifact directory has room
///
/// A shortfall is re-checked once after a short wait; if space is still
/// short the asset fails before any network work.
#[derive(Debug, Clone)]
pub struct DiskAdmission {
    dir: PathBuf,
    min_free_mb: u64,
    recheck_after: Duration,
}

impl DiskAdmission {
    pub fn new(dir: impl Into<PathBuf>, min_free_mb: u64, recheck_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            min_free_mb,
            recheck_after,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            &config.temp_dir,
            config.min_free_disk_mb,
            Duration::from_secs(config.disk_recheck_secs),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn admit(&self, url: &str) -> Result<()> {
        if self.min_free_mb == 0 {
            return Ok(());
        }

        let available = available_mb(&self.dir)?;
        if available >= self.min_free_mb {
            return Ok(());
        }

        tracing::warn!(
            "Low disk space: {}MB free, {}MB required; re-checking in {}s",
            available,
            self.min_free_mb,
            self.recheck_after.as_secs()
        );
        tokio::time::sleep(self.recheck_after).await;

        let available = available_mb(&self.dir)?;
        if available >= self.min_free_mb {
            return Ok(());
        }

        Err(HarvestError::DiskSpace {
            url: url.to_string(),
            available_mb: available,
            required_mb: self.min_free_mb,
        })
    }
}

/// Deletes a local artifact when dropped
///
/// Held by the worker from the moment a file exists, so the file goes away on
/// success, on relay failure and on an early return alike.
#[derive(Debug)]
pub struct ArtifactGuard {
    path: PathBuf,
}

impl ArtifactGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!("Cleaned up {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to delete {}: {}", self.path.display(), e),
        }
    }
}
