//! Delegated extraction through yt-dlp
//!
//! yt-dlp understands a wide range of hosting platforms. Extraction only asks
//! it for metadata; the page URL is passed through as the media URL because
//! the fetch step hands non-direct URLs to yt-dlp again.

use crate::{HarvestError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// What a resolver reports for a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub title: Option<String>,
    /// Direct media URL, or the page URL itself when the fetcher understands it
    pub url: String,
}

/// General-purpose media resolver
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia>;
}

/// Metadata subset read from `--dump-single-json`
#[derive(Debug, Deserialize)]
struct YtDlpMetadata {
    #[serde(default)]
    title: Option<String>,
}

/// Resolver backed by the yt-dlp binary
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    proxy: Option<String>,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(binary: &str, proxy: Option<&str>, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            proxy: proxy.map(str::to_string),
            timeout,
        }
    }
}

#[async_trait]
impl MediaResolver for YtDlp {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia> {
        let args = [
            "--dump-single-json",
            "--skip-download",
            "--no-playlist",
            "--no-warnings",
        ];
        let output = run_yt_dlp(&self.binary, &args, url, self.proxy.as_deref(), self.timeout)
            .await
            .map_err(|message| HarvestError::extraction(url, message))?;

        let metadata: YtDlpMetadata = serde_json::from_slice(&output.stdout).map_err(|e| {
            HarvestError::extraction(url, format!("Failed to parse yt-dlp JSON output: {}", e))
        })?;

        let title = metadata
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(ResolvedMedia {
            title,
            url: url.to_string(),
        })
    }
}

/// Runs yt-dlp with `args` against `url`, bounded by `timeout`
///
/// Returns the last stderr line as the error when the process fails.
pub async fn run_yt_dlp(
    binary: &str,
    args: &[&str],
    url: &str,
    proxy: Option<&str>,
    timeout: Duration,
) -> std::result::Result<Output, String> {
    let mut cmd = Command::new(binary);
    cmd.args(args);

    if let Some(proxy) = proxy {
        tracing::debug!("Using proxy for yt-dlp: {}", proxy);
        cmd.args(["--proxy", proxy]);
    }

    cmd.arg(url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("Failed to execute {}: {}", binary, e)),
        Err(_) => return Err(format!("yt-dlp timed out after {}s", timeout.as_secs())),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!("yt-dlp stderr: {}", stderr.trim());
        let reason = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("no diagnostic output")
            .trim()
            .to_string();
        return Err(format!("yt-dlp failed: {}", reason));
    }

    Ok(output)
}
