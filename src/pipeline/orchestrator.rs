//! Per-asset state machine and batch worker pool

use super::disk::{ArtifactGuard, DiskAdmission};
use super::fetch::{Fetcher, MediaFetcher};
use super::relay::{BunnyRelay, Relay};
use crate::config::{Config, WORKER_LIMIT};
use crate::extract::{Extractor, MediaExtractor};
use crate::state::AssetStatus;
use crate::storage::{lock_storage, AssetStore, SharedStorage, StatusUpdate, StorageError};
use crate::url::normalize_url;
use crate::{HarvestError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Aggregate result of one processing batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub completed_count: usize,
    pub failed_count: usize,
}

/// What happened to one asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Relayed; carries the remote identifier
    Completed(String),
    /// Already completed or held by a worker; nothing was done
    Skipped,
    /// Recorded as FAILED with this diagnostic
    Failed(String),
}

/// Drives assets through extract, fetch and relay
#[derive(Clone)]
pub struct Pipeline {
    storage: SharedStorage,
    extractor: Arc<dyn MediaExtractor>,
    fetcher: Arc<dyn Fetcher>,
    relay: Arc<dyn Relay>,
    admission: DiskAdmission,
    config_hash: String,
    max_workers: usize,
    /// Id of the batch this pipeline is running, 0 when idle
    active_batch: Arc<AtomicI64>,
}

impl Pipeline {
    /// Builds the pipeline with the production collaborators
    ///
    /// Fails with a configuration error when relay credentials are missing.
    pub fn new(config: &Config, config_hash: &str, storage: SharedStorage) -> Result<Self> {
        let relay = BunnyRelay::new(&config.relay, config.proxy.as_deref())?;
        let extractor = Extractor::new(config)?;
        let fetcher = MediaFetcher::from_config(config)?;

        std::fs::create_dir_all(&config.pipeline.temp_dir)?;

        Ok(Self::with_parts(
            storage,
            Arc::new(extractor),
            Arc::new(fetcher),
            Arc::new(relay),
            DiskAdmission::from_config(&config.pipeline),
            config_hash,
            config.pipeline.max_workers,
        ))
    }

    pub fn with_parts(
        storage: SharedStorage,
        extractor: Arc<dyn MediaExtractor>,
        fetcher: Arc<dyn Fetcher>,
        relay: Arc<dyn Relay>,
        admission: DiskAdmission,
        config_hash: &str,
        max_workers: usize,
    ) -> Self {
        Self {
            storage,
            extractor,
            fetcher,
            relay,
            admission,
            config_hash: config_hash.to_string(),
            max_workers: max_workers.clamp(1, WORKER_LIMIT),
            active_batch: Arc::new(AtomicI64::new(0)),
        }
    }

    // ===== Queries =====

    pub fn get_status_counts(&self) -> Result<HashMap<AssetStatus, u64>> {
        Ok(lock_storage(&self.storage).status_counts()?)
    }

    pub fn get_total_count(&self) -> Result<u64> {
        Ok(lock_storage(&self.storage).total_count()?)
    }

    /// Startup recovery: resets in-flight assets to PENDING and marks batches
    /// left running by a dead process as interrupted
    ///
    /// Refused while this pipeline runs a batch, since its in-flight rows are live.
    pub fn reset_stale(&self) -> Result<usize> {
        let mut storage = lock_storage(&self.storage);
        let running = self.active_batch.load(Ordering::SeqCst);
        if running != 0 {
            return Err(StorageError::BatchInProgress(running).into());
        }
        let reset = storage.reset_stale()?;
        if reset > 0 {
            tracing::info!("Reset {} stale assets to PENDING", reset);
        }
        Ok(reset)
    }

    // ===== Per-asset workflow =====

    /// Runs one asset through the full state machine
    ///
    /// Unknown URLs are inserted as PENDING first. Per-asset failures are
    /// recorded on the asset and reported as [`AssetOutcome::Failed`]; only
    /// fatal errors are returned.
    pub async fn process_asset(&self, url: &str) -> Result<AssetOutcome> {
        let url = normalize_url(url)?.to_string();

        let status = {
            let mut storage = lock_storage(&self.storage);
            if storage.insert_asset(&url)? {
                tracing::info!("Inserted ad-hoc asset {}", url);
            }
            storage.get_status(&url)?
        };

        match status {
            Some(AssetStatus::Completed) => {
                tracing::info!("Already completed, skipping {}", url);
                return Ok(AssetOutcome::Skipped);
            }
            Some(s) if s.is_in_flight() => {
                tracing::warn!("Asset {} is already {}, skipping", url, s);
                return Ok(AssetOutcome::Skipped);
            }
            _ => {}
        }

        match self.run_stages(&url).await {
            Ok(remote_id) => {
                tracing::info!("Completed {} -> {}", url, remote_id);
                Ok(AssetOutcome::Completed(remote_id))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let diagnostic = e.to_string();
                tracing::error!("Asset {} failed: {}", url, diagnostic);
                let recorded = lock_storage(&self.storage).mark_failed(&url, &diagnostic);
                match recorded {
                    Ok(()) => {}
                    Err(store_err) if store_err.is_connectivity() => return Err(store_err.into()),
                    Err(store_err) => {
                        tracing::warn!("Could not record failure for {}: {}", url, store_err)
                    }
                }
                Ok(AssetOutcome::Failed(diagnostic))
            }
        }
    }

    async fn run_stages(&self, url: &str) -> Result<String> {
        self.admission.admit(url).await?;

        self.transition(url, AssetStatus::Extracting, StatusUpdate::default())?;
        let media = self.extractor.extract(url).await?;

        self.transition(url, AssetStatus::Downloading, StatusUpdate::default())?;
        let artifact = self.fetcher.fetch(&media.media_url, url).await?;
        let guard = ArtifactGuard::new(&artifact.path);

        self.transition(
            url,
            AssetStatus::Uploading,
            StatusUpdate::default().with_local_artifact_name(&artifact.name),
        )?;
        let title = media
            .title
            .clone()
            .unwrap_or_else(|| artifact.name.clone());
        let remote_id = self.relay.register(&title).await?;
        self.relay.transfer(&remote_id, guard.path()).await?;

        self.transition(
            url,
            AssetStatus::Completed,
            StatusUpdate::default().with_remote_id(&remote_id),
        )?;

        drop(guard);
        Ok(remote_id)
    }

    fn transition(&self, url: &str, status: AssetStatus, update: StatusUpdate) -> Result<()> {
        lock_storage(&self.storage).update_status(url, status, &update)?;
        tracing::info!(url = %url, status = %status, "Stage transition");
        Ok(())
    }

    // ===== Batches =====

    fn effective_workers(&self, requested: usize) -> usize {
        if requested > self.max_workers {
            tracing::warn!(
                "Requested {} workers, capping at {} to bound browser memory",
                requested,
                self.max_workers
            );
            self.max_workers
        } else {
            requested.max(1)
        }
    }

    /// Processes every PENDING or FAILED asset with a bounded worker pool
    ///
    /// Fails with `BatchInProgress` while any batch is marked running in the
    /// store, including one left behind by a crash; [`Pipeline::reset_stale`]
    /// clears that. Once the batch is open, stale in-flight rows are reset. The
    /// eligible set is captured once; assets added while the batch runs wait
    /// for the next one.
    pub async fn process_pending(&self, workers: usize) -> Result<BatchStats> {
        let workers = self.effective_workers(workers);

        // Checked and claimed under the store lock, so two callers cannot both pass.
        // The ledger row is claimed before any asset is touched: a batch left
        // running by another process refuses this one instead of being reclaimed.
        let (batch_id, urls) = {
            let mut storage = lock_storage(&self.storage);
            let running = self.active_batch.load(Ordering::SeqCst);
            if running != 0 {
                return Err(StorageError::BatchInProgress(running).into());
            }
            let batch_id = storage.begin_batch(&self.config_hash, workers)?;

            let prepared = storage
                .reset_stale_assets()
                .and_then(|reset| Ok((reset, storage.eligible_urls()?)));
            let urls = match prepared {
                Ok((reset, urls)) => {
                    if reset > 0 {
                        tracing::info!("Reset {} stale assets to PENDING", reset);
                    }
                    urls
                }
                Err(e) => {
                    if let Err(close_err) = storage.interrupt_batch(batch_id) {
                        tracing::warn!("Could not close batch {}: {}", batch_id, close_err);
                    }
                    return Err(e.into());
                }
            };

            self.active_batch.store(batch_id, Ordering::SeqCst);
            (batch_id, urls)
        };
        let _active = ActiveBatch(Arc::clone(&self.active_batch));

        tracing::info!(
            "Batch {} started: {} assets, {} workers",
            batch_id,
            urls.len(),
            workers
        );

        let queue = Arc::new(Mutex::new(urls.into_iter().collect::<VecDeque<_>>()));
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let halted = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let pipeline = self.clone();
            let queue = Arc::clone(&queue);
            let completed = Arc::clone(&completed);
            let failed = Arc::clone(&failed);
            let halted = Arc::clone(&halted);

            handles.push(tokio::spawn(async move {
                loop {
                    if halted.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    let next = queue.lock().await.pop_front();
                    let Some(url) = next else {
                        return Ok(());
                    };

                    tracing::debug!(worker_id, url = %url, "Worker picked asset");
                    match pipeline.process_asset(&url).await {
                        Ok(AssetOutcome::Completed(_)) => {
                            completed.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(AssetOutcome::Failed(_)) => {
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(AssetOutcome::Skipped) => {}
                        Err(e) => {
                            halted.store(true, Ordering::SeqCst);
                            return Err(e);
                        }
                    }
                }
            }));
        }

        let mut fatal: Option<HarvestError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Worker stopped on fatal error: {}", e);
                    fatal.get_or_insert(e);
                }
                Err(join_err) => tracing::error!("Worker task panicked: {}", join_err),
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        let stats = BatchStats {
            completed_count: completed.load(Ordering::SeqCst),
            failed_count: failed.load(Ordering::SeqCst),
        };
        lock_storage(&self.storage).finish_batch(
            batch_id,
            stats.completed_count,
            stats.failed_count,
        )?;

        tracing::info!(
            "Batch {} finished: {} completed, {} failed",
            batch_id,
            stats.completed_count,
            stats.failed_count
        );
        Ok(stats)
    }

    /// Starts a batch in the background; the caller polls the status counts
    pub fn spawn(&self, workers: usize) -> JoinHandle<Result<BatchStats>> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.process_pending(workers).await })
    }
}

/// Clears the running batch id on every exit path
struct ActiveBatch(Arc<AtomicI64>);

impl Drop for ActiveBatch {
    fn drop(&mut self) {
        self.0.store(0, Ordering::SeqCst);
    }
}
