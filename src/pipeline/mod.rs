//! Processing pipeline
//!
//! Moves PENDING and FAILED assets through extraction, fetch and relay:
//! - Retry policy used inside the fetch and relay collaborators
//! - HTTP and yt-dlp fetchers producing local artifacts
//! - The two-step relay to the hosting library
//! - Disk admission and artifact cleanup
//! - The per-asset state machine and the batch worker pool

mod disk;
mod fetch;
mod orchestrator;
mod relay;
mod retry;

pub use disk::{available_mb, ArtifactGuard, DiskAdmission};
pub use fetch::{FetchedArtifact, Fetcher, HttpFetcher, MediaFetcher, YtDlpFetcher};
pub use orchestrator::{AssetOutcome, BatchStats, Pipeline};
pub use relay::{BunnyRelay, Relay};
pub use retry::{
    classify_http_status, classify_reqwest_error, AttemptError, FailureType, RetryDecision,
    RetryPolicy,
};
