//! Relay collaborator
//!
//! Two-step handshake with the hosting library: register a remote object for a
//! title, then transfer the artifact bytes into it. Both steps retry transient
//! failures. Credentials are checked when the relay is built, so a missing key
//! stops the process before any asset is touched.

use super::retry::{AttemptError, RetryPolicy};
use crate::config::{relay_credentials, RelayConfig};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ACCESS_KEY_HEADER: &str = "AccessKey";

/// Longest slice of an error body kept in a diagnostic
const BODY_EXCERPT_CHARS: usize = 200;

/// Remote hosting library
#[async_trait]
pub trait Relay: Send + Sync {
    /// Creates a remote object and returns its identifier
    async fn register(&self, title: &str) -> Result<String>;

    /// Uploads the artifact at `path` into the remote object
    async fn transfer(&self, remote_id: &str, path: &Path) -> Result<()>;

    /// Fetches the remote object's metadata; `None` if it does not exist
    async fn get_asset_info(&self, remote_id: &str) -> Result<Option<serde_json::Value>>;
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    guid: Option<String>,
}

/// Relay for a Bunny Stream style video library
#[derive(Debug, Clone)]
pub struct BunnyRelay {
    client: Client,
    base_url: String,
    library_id: String,
    access_key: String,
    retry: RetryPolicy,
}

impl BunnyRelay {
    pub fn new(config: &RelayConfig, proxy: Option<&str>) -> Result<Self> {
        let (access_key, library_id) = relay_credentials(config)?;

        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| HarvestError::relay(&config.base_url, e.to_string()))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| HarvestError::relay(&config.base_url, e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            library_id,
            access_key,
            retry: RetryPolicy::with_max_attempts(config.max_attempts),
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn videos_url(&self) -> String {
        format!("{}/{}/videos", self.base_url, self.library_id)
    }

    fn video_url(&self, remote_id: &str) -> String {
        format!("{}/{}", self.videos_url(), remote_id)
    }

    async fn register_once(&self, title: &str) -> std::result::Result<String, AttemptError> {
        let response = self
            .client
            .post(self.videos_url())
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .header(ACCEPT, "application/json")
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await
            .map_err(|e| AttemptError::network(&e))?;

        let response = check_status(response, "Failed to create video").await?;
        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::permanent(format!("Unreadable create response: {}", e)))?;

        body.guid
            .filter(|g| !g.is_empty())
            .ok_or_else(|| AttemptError::permanent("Create response carried no guid"))
    }

    async fn transfer_once(
        &self,
        remote_id: &str,
        path: &Path,
    ) -> std::result::Result<(), AttemptError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| AttemptError::permanent(format!("Cannot open {}: {}", path.display(), e)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| AttemptError::permanent(format!("Cannot stat {}: {}", path.display(), e)))?
            .len();

        let response = self
            .client
            .put(self.video_url(remote_id))
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| AttemptError::network(&e))?;

        check_status(response, "Failed to upload binary").await?;
        Ok(())
    }
}

async fn check_status(
    response: reqwest::Response,
    context: &str,
) -> std::result::Result<reqwest::Response, AttemptError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
    Err(AttemptError::http_status(
        status.as_u16(),
        format!("{} (HTTP {}): {}", context, status.as_u16(), excerpt.trim()),
    ))
}

#[async_trait]
impl Relay for BunnyRelay {
    async fn register(&self, title: &str) -> Result<String> {
        tracing::info!("Registering remote video: {}", title);

        let guid = self
            .retry
            .run(
                "relay register",
                |_| self.register_once(title),
                |e: &AttemptError| e.kind,
            )
            .await
            .map_err(|e| HarvestError::relay(title, e.to_string()))?;

        tracing::info!("Remote video created with id {}", guid);
        Ok(guid)
    }

    async fn transfer(&self, remote_id: &str, path: &Path) -> Result<()> {
        let size_mb = tokio::fs::metadata(path)
            .await
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);
        tracing::info!("Uploading {:.2}MB to remote video {}", size_mb, remote_id);

        self.retry
            .run(
                "relay transfer",
                |_| self.transfer_once(remote_id, path),
                |e: &AttemptError| e.kind,
            )
            .await
            .map_err(|e| HarvestError::relay(remote_id, e.to_string()))?;

        tracing::info!("Upload complete for {}", remote_id);
        Ok(())
    }

    async fn get_asset_info(&self, remote_id: &str) -> Result<Option<serde_json::Value>> {
        let response = self
            .client
            .get(self.video_url(remote_id))
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| HarvestError::relay(remote_id, e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(response, "Failed to read video")
            .await
            .map_err(|e| HarvestError::relay(remote_id, e.to_string()))?;
        let info = response
            .json()
            .await
            .map_err(|e| HarvestError::relay(remote_id, e.to_string()))?;
        Ok(Some(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(access_key: Option<&str>, library_id: Option<&str>) -> RelayConfig {
        RelayConfig {
            access_key: access_key.map(String::from),
            library_id: library_id.map(String::from),
            ..RelayConfig::default()
        }
    }

    #[test]
    fn test_missing_credentials_fail_fast() {
        let err = BunnyRelay::new(&config(None, Some("42")), None).unwrap_err();
        assert!(matches!(err, HarvestError::Configuration(_)));
        assert!(err.is_fatal());

        let err = BunnyRelay::new(&config(Some("key"), None), None).unwrap_err();
        assert!(matches!(err, HarvestError::Configuration(_)));
    }

    #[test]
    fn test_urls_include_library() {
        let relay = BunnyRelay::new(&config(Some("key"), Some("42")), None).unwrap();
        assert_eq!(
            relay.videos_url(),
            "https://video.bunnycdn.com/library/42/videos"
        );
        assert_eq!(
            relay.video_url("abc"),
            "https://video.bunnycdn.com/library/42/videos/abc"
        );
    }
}
