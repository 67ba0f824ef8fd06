//! Fetch collaborator
//!
//! Turns a resolved media URL into a local artifact named `<uuid>.<ext>` in the
//! temp directory. Direct container files are streamed over HTTP with the page
//! as referer; everything else goes through yt-dlp.

use super::retry::{AttemptError, RetryPolicy};
use crate::config::Config;
use crate::extract::{is_direct_media, run_yt_dlp};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{REFERER, USER_AGENT};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use url::Url;
use uuid::Uuid;

const FETCH_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Format preference handed to yt-dlp
const YT_DLP_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// A media file on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    /// File name inside the temp directory
    pub name: String,
    pub path: PathBuf,
}

/// Retrieves media into a local artifact
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, media_url: &str, referer: &str) -> Result<FetchedArtifact>;
}

fn artifact_stem() -> String {
    Uuid::new_v4().to_string()
}

/// Streams direct media files over HTTP
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    temp_dir: PathBuf,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(
        temp_dir: impl Into<PathBuf>,
        timeout: Duration,
        proxy: Option<&str>,
        retry: RetryPolicy,
    ) -> std::result::Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            temp_dir: temp_dir.into(),
            retry,
        })
    }

    async fn attempt(
        &self,
        media_url: &str,
        referer: &str,
        path: &Path,
    ) -> std::result::Result<u64, AttemptError> {
        let response = self
            .client
            .get(media_url)
            .header(REFERER, referer)
            .header(USER_AGENT, FETCH_USER_AGENT)
            .send()
            .await
            .map_err(|e| AttemptError::network(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::http_status(
                status.as_u16(),
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let mut file = File::create(path)
            .await
            .map_err(|e| AttemptError::permanent(format!("Cannot create {}: {}", path.display(), e)))?;

        let result = stream_to_file(&mut file, response, path).await;
        if result.is_err() {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
        }
        result
    }
}

/// Streams a response body to `file`, returning bytes written
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    path: &Path,
) -> std::result::Result<u64, AttemptError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AttemptError::network(&e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| AttemptError::permanent(format!("Write to {} failed: {}", path.display(), e)))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| AttemptError::permanent(format!("Flush of {} failed: {}", path.display(), e)))?;

    Ok(bytes_written)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, media_url: &str, referer: &str) -> Result<FetchedArtifact> {
        let url = Url::parse(media_url)
            .map_err(|e| HarvestError::fetch(media_url, format!("Invalid media URL: {}", e)))?;
        let ext = url
            .path()
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 4 && !ext.contains('/'))
            .unwrap_or_else(|| "mp4".to_string());

        let name = format!("{}.{}", artifact_stem(), ext);
        let path = self.temp_dir.join(&name);

        tracing::info!("Downloading {} -> {}", media_url, name);
        let bytes = self
            .retry
            .run(
                "HTTP fetch",
                |_| self.attempt(media_url, referer, &path),
                |e: &AttemptError| e.kind,
            )
            .await
            .map_err(|e| {
                HarvestError::fetch(
                    media_url,
                    format!("Download failed after retries: {}", e),
                )
            })?;

        tracing::info!(
            "Downloaded {} ({:.2}MB)",
            name,
            bytes as f64 / (1024.0 * 1024.0)
        );
        Ok(FetchedArtifact { name, path })
    }
}

/// Downloads through the yt-dlp binary
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    binary: String,
    proxy: Option<String>,
    temp_dir: PathBuf,
    timeout: Duration,
    retry: RetryPolicy,
}

impl YtDlpFetcher {
    pub fn new(
        binary: &str,
        proxy: Option<&str>,
        temp_dir: impl Into<PathBuf>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            binary: binary.to_string(),
            proxy: proxy.map(str::to_string),
            temp_dir: temp_dir.into(),
            timeout,
            retry,
        }
    }

    async fn attempt(
        &self,
        media_url: &str,
        referer: &str,
        stem: &str,
    ) -> std::result::Result<FetchedArtifact, AttemptError> {
        let template = self.temp_dir.join(format!("{}.%(ext)s", stem));
        let template = template.to_string_lossy().into_owned();
        let args = [
            "-f",
            YT_DLP_FORMAT,
            "-o",
            template.as_str(),
            "--no-playlist",
            "--quiet",
            "--no-warnings",
            "--socket-timeout",
            "30",
            "--retries",
            "3",
            "--referer",
            referer,
            "--user-agent",
            FETCH_USER_AGENT,
        ];

        if let Err(message) = run_yt_dlp(
            &self.binary,
            &args,
            media_url,
            self.proxy.as_deref(),
            self.timeout,
        )
        .await
        {
            remove_with_stem(&self.temp_dir, stem).await;
            return Err(if message.starts_with("Failed to execute") {
                AttemptError::permanent(message)
            } else {
                AttemptError::transient(message)
            });
        }

        find_with_stem(&self.temp_dir, stem)
            .await
            .ok_or_else(|| AttemptError::permanent("File not found after download"))
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(&self, media_url: &str, referer: &str) -> Result<FetchedArtifact> {
        let stem = artifact_stem();
        tracing::info!("Downloading {} via yt-dlp", media_url);

        let artifact = self
            .retry
            .run(
                "yt-dlp fetch",
                |_| self.attempt(media_url, referer, &stem),
                |e: &AttemptError| e.kind,
            )
            .await
            .map_err(|e| HarvestError::fetch(media_url, e.to_string()))?;

        tracing::info!("Downloaded {}", artifact.name);
        Ok(artifact)
    }
}

/// Finds the finished file yt-dlp wrote for `stem`, ignoring partial files
async fn find_with_stem(dir: &Path, stem: &str) -> Option<FetchedArtifact> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(stem) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
            return Some(FetchedArtifact {
                path: entry.path(),
                name,
            });
        }
    }
    None
}

async fn remove_with_stem(dir: &Path, stem: &str) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(stem) {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
}

/// Routes direct files to HTTP and everything else to yt-dlp
pub struct MediaFetcher {
    http: HttpFetcher,
    delegated: YtDlpFetcher,
}

impl MediaFetcher {
    pub fn new(http: HttpFetcher, delegated: YtDlpFetcher) -> Self {
        Self { http, delegated }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let proxy = config.proxy.as_deref();
        let timeout = Duration::from_secs(config.fetch.timeout_secs);
        let retry = RetryPolicy::with_max_attempts(config.fetch.max_attempts);

        let http = HttpFetcher::new(&config.pipeline.temp_dir, timeout, proxy, retry.clone())
            .map_err(|e| HarvestError::fetch("http client", e.to_string()))?;
        let delegated = YtDlpFetcher::new(
            &config.fetch.yt_dlp_path,
            proxy,
            &config.pipeline.temp_dir,
            timeout,
            retry,
        );

        Ok(Self::new(http, delegated))
    }
}

#[async_trait]
impl Fetcher for MediaFetcher {
    async fn fetch(&self, media_url: &str, referer: &str) -> Result<FetchedArtifact> {
        let direct = Url::parse(media_url)
            .map(|u| is_direct_media(&u))
            .unwrap_or(false);

        if direct {
            self.http.fetch(media_url, referer).await
        } else {
            self.delegated.fetch(media_url, referer).await
        }
    }
}
