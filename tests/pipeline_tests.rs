//! Integration tests for the processing pipeline
//!
//! Collaborators are replaced by in-test implementations of the extraction,
//! fetch and relay traits; the store is a real SQLite file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use vid_harvest::extract::{ExtractedMedia, MediaExtractor};
use vid_harvest::pipeline::{DiskAdmission, FetchedArtifact, Fetcher, Pipeline, Relay};
use vid_harvest::state::AssetStatus;
use vid_harvest::storage::{
    lock_storage, open_shared_storage, AssetStore, BatchStatus, SharedStorage, StatusUpdate,
    StorageError,
};
use vid_harvest::{HarvestError, Result};

/// Extractor that fails for URLs containing "clip-3" and counts calls
struct ScriptedExtractor {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl MediaExtractor for ScriptedExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if url.contains("clip-3") {
            return Err(HarvestError::extraction(
                url,
                "No video URLs intercepted after 15s interaction",
            ));
        }
        Ok(ExtractedMedia {
            media_url: format!("{}media.mp4", url),
            title: None,
        })
    }
}

struct TempFileFetcher {
    dir: PathBuf,
    paths: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Fetcher for TempFileFetcher {
    async fn fetch(&self, _media_url: &str, _referer: &str) -> Result<FetchedArtifact> {
        let name = format!("{}.mp4", uuid::Uuid::new_v4());
        let path = self.dir.join(&name);
        std::fs::write(&path, b"not really a video")?;
        self.paths.lock().unwrap().push(path.clone());
        Ok(FetchedArtifact { name, path })
    }
}

/// Relay that records the titles it was asked to register
struct RecordingRelay {
    titles: Mutex<Vec<String>>,
}

#[async_trait]
impl Relay for RecordingRelay {
    async fn register(&self, title: &str) -> Result<String> {
        self.titles.lock().unwrap().push(title.to_string());
        Ok(format!("remote-{}", uuid::Uuid::new_v4()))
    }

    async fn transfer(&self, _remote_id: &str, path: &Path) -> Result<()> {
        assert!(path.exists(), "artifact must exist during transfer");
        Ok(())
    }

    async fn get_asset_info(&self, _remote_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

struct Harness {
    pipeline: Pipeline,
    storage: SharedStorage,
    extractor: Arc<ScriptedExtractor>,
    fetcher: Arc<TempFileFetcher>,
    relay: Arc<RecordingRelay>,
    _dir: TempDir,
}

fn harness(extract_delay: Duration) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let storage = open_shared_storage(&dir.path().join("assets.db")).expect("Failed to open store");
    let artifacts = dir.path().join("artifacts");
    std::fs::create_dir_all(&artifacts).unwrap();

    let extractor = Arc::new(ScriptedExtractor {
        calls: AtomicUsize::new(0),
        delay: extract_delay,
    });
    let fetcher = Arc::new(TempFileFetcher {
        dir: artifacts.clone(),
        paths: Mutex::new(Vec::new()),
    });
    let relay = Arc::new(RecordingRelay {
        titles: Mutex::new(Vec::new()),
    });

    let pipeline = Pipeline::with_parts(
        Arc::clone(&storage),
        extractor.clone(),
        fetcher.clone(),
        relay.clone(),
        DiskAdmission::new(&artifacts, 0, Duration::ZERO),
        "test-config-hash",
        2,
    );

    Harness {
        pipeline,
        storage,
        extractor,
        fetcher,
        relay,
        _dir: dir,
    }
}

fn seed(storage: &SharedStorage, count: usize) -> Vec<String> {
    let urls: Vec<String> = (1..=count)
        .map(|i| format!("https://site.test/clip-{}/", i))
        .collect();
    lock_storage(storage).bulk_insert_new(&urls).unwrap();
    urls
}

#[tokio::test]
async fn test_one_failure_does_not_abort_the_batch() {
    let h = harness(Duration::ZERO);
    let urls = seed(&h.storage, 5);

    let stats = h.pipeline.process_pending(2).await.expect("Batch failed");

    assert_eq!(stats.completed_count, 4);
    assert_eq!(stats.failed_count, 1);

    let store = lock_storage(&h.storage);
    let failed = store.get_asset(&urls[2]).unwrap().unwrap();
    assert_eq!(failed.status, AssetStatus::Failed);
    assert!(failed
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("No video URLs intercepted")));

    for (i, url) in urls.iter().enumerate().filter(|(i, _)| *i != 2) {
        let record = store.get_asset(url).unwrap().unwrap();
        assert_eq!(record.status, AssetStatus::Completed, "asset #{}", i + 1);
        assert!(record.remote_id.is_some());
        assert!(record.last_error.is_none());
    }
    drop(store);

    let counts = h.pipeline.get_status_counts().unwrap();
    assert_eq!(counts[&AssetStatus::Completed], 4);
    assert_eq!(counts[&AssetStatus::Failed], 1);
    assert_eq!(counts[&AssetStatus::Pending], 0);
    assert_eq!(h.pipeline.get_total_count().unwrap(), 5);
}

#[tokio::test]
async fn test_artifacts_are_cleaned_up_on_every_path() {
    let h = harness(Duration::ZERO);
    seed(&h.storage, 3);

    h.pipeline.process_pending(2).await.expect("Batch failed");

    let paths = h.fetcher.paths.lock().unwrap();
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|p| !p.exists()));
}

#[tokio::test]
async fn test_untitled_media_is_registered_under_artifact_name() {
    let h = harness(Duration::ZERO);

    h.pipeline
        .process_asset("https://site.test/clip-1/")
        .await
        .expect("Processing failed");

    let titles = h.relay.titles.lock().unwrap();
    assert_eq!(titles.len(), 1);
    assert!(titles[0].ends_with(".mp4"));

    let record = lock_storage(&h.storage)
        .get_asset("https://site.test/clip-1/")
        .unwrap()
        .unwrap();
    assert_eq!(record.local_artifact_name.as_deref(), Some(titles[0].as_str()));
}

#[tokio::test]
async fn test_completed_asset_is_a_no_op() {
    let h = harness(Duration::ZERO);
    let url = "https://site.test/clip-1/";

    h.pipeline.process_asset(url).await.unwrap();
    let first = lock_storage(&h.storage).get_asset(url).unwrap().unwrap();

    h.pipeline.process_asset(url).await.unwrap();
    let second = lock_storage(&h.storage).get_asset(url).unwrap().unwrap();

    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.fetcher.paths.lock().unwrap().len(), 1);
    assert_eq!(first.remote_id, second.remote_id);

    let stats = h.pipeline.process_pending(2).await.unwrap();
    assert_eq!(stats.completed_count, 0);
    assert_eq!(stats.failed_count, 0);
}

#[tokio::test]
async fn test_crash_leftovers_are_recovered() {
    let h = harness(Duration::ZERO);
    let urls = seed(&h.storage, 1);

    {
        let mut store = lock_storage(&h.storage);
        store
            .update_status(&urls[0], AssetStatus::Extracting, &StatusUpdate::default())
            .unwrap();
        store
            .update_status(&urls[0], AssetStatus::Downloading, &StatusUpdate::default())
            .unwrap();
        // A batch the crashed process never closed
        store.begin_batch("old-hash", 2).unwrap();
    }

    let reset = h.pipeline.reset_stale().unwrap();
    assert_eq!(reset, 1);
    assert_eq!(
        lock_storage(&h.storage).get_status(&urls[0]).unwrap(),
        Some(AssetStatus::Pending)
    );
    assert_eq!(h.pipeline.get_total_count().unwrap(), 1);
    assert_eq!(h.pipeline.reset_stale().unwrap(), 0);

    let stats = h.pipeline.process_pending(1).await.unwrap();
    assert_eq!(stats.completed_count, 1);

    let store = lock_storage(&h.storage);
    assert_eq!(store.get_batch(1).unwrap().status, BatchStatus::Interrupted);
    assert_eq!(store.get_batch(2).unwrap().status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_second_batch_is_refused_while_one_runs() {
    let h = harness(Duration::from_millis(300));
    seed(&h.storage, 2);

    let running = h.pipeline.spawn(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = h.pipeline.process_pending(1).await.unwrap_err();
    assert!(matches!(
        err,
        HarvestError::Persistence(StorageError::BatchInProgress(_))
    ));
    assert!(h.pipeline.reset_stale().is_err());

    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.completed_count, 2);

    // Once finished, a new batch may start
    assert!(h.pipeline.process_pending(1).await.is_ok());
}

#[test]
fn test_store_refuses_two_running_batches() {
    let dir = TempDir::new().unwrap();
    let storage = open_shared_storage(&dir.path().join("assets.db")).unwrap();
    let mut store = lock_storage(&storage);

    let first = store.begin_batch("hash", 2).unwrap();
    let err = store.begin_batch("hash", 2).unwrap_err();
    assert!(matches!(err, StorageError::BatchInProgress(id) if id == first));

    store.finish_batch(first, 0, 0).unwrap();
    assert!(store.begin_batch("hash", 2).is_ok());
}

#[tokio::test]
async fn test_batch_running_in_another_process_is_left_alone() {
    let h = harness(Duration::ZERO);
    let urls = seed(&h.storage, 1);

    // A second connection on the same file stands in for another process
    let other = open_shared_storage(&h._dir.path().join("assets.db")).unwrap();
    let foreign_batch = {
        let mut store = lock_storage(&other);
        store
            .update_status(&urls[0], AssetStatus::Extracting, &StatusUpdate::default())
            .unwrap();
        store
            .update_status(&urls[0], AssetStatus::Downloading, &StatusUpdate::default())
            .unwrap();
        store.begin_batch("other-hash", 2).unwrap()
    };

    let err = h.pipeline.process_pending(1).await.unwrap_err();
    assert!(matches!(
        err,
        HarvestError::Persistence(StorageError::BatchInProgress(id)) if id == foreign_batch
    ));
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);

    {
        let store = lock_storage(&other);
        assert_eq!(
            store.get_batch(foreign_batch).unwrap().status,
            BatchStatus::Running
        );
        assert_eq!(
            store.get_status(&urls[0]).unwrap(),
            Some(AssetStatus::Downloading)
        );
    }

    // The other process finishes its asset and closes its batch
    {
        let mut store = lock_storage(&other);
        store
            .update_status(&urls[0], AssetStatus::Uploading, &StatusUpdate::default())
            .unwrap();
        store
            .update_status(
                &urls[0],
                AssetStatus::Completed,
                &StatusUpdate::default().with_remote_id("remote-other"),
            )
            .unwrap();
        store.finish_batch(foreign_batch, 1, 0).unwrap();
    }

    let stats = h.pipeline.process_pending(1).await.unwrap();
    assert_eq!(stats.completed_count, 0);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);

    let store = lock_storage(&h.storage);
    assert_eq!(
        store.get_batch(foreign_batch).unwrap().status,
        BatchStatus::Completed
    );
    let record = store.get_asset(&urls[0]).unwrap().unwrap();
    assert_eq!(record.status, AssetStatus::Completed);
    assert_eq!(record.remote_id.as_deref(), Some("remote-other"));
}

#[tokio::test]
async fn test_crashed_batch_blocks_processing_until_reset() {
    let h = harness(Duration::ZERO);
    seed(&h.storage, 1);
    let crashed = lock_storage(&h.storage).begin_batch("old-hash", 2).unwrap();

    let err = h.pipeline.process_pending(1).await.unwrap_err();
    assert!(matches!(
        err,
        HarvestError::Persistence(StorageError::BatchInProgress(id)) if id == crashed
    ));

    h.pipeline.reset_stale().unwrap();
    let stats = h.pipeline.process_pending(1).await.unwrap();
    assert_eq!(stats.completed_count, 1);
    assert_eq!(
        lock_storage(&h.storage).get_batch(crashed).unwrap().status,
        BatchStatus::Interrupted
    );
}
