//! HTTP page fetching for discovery
//!
//! This module handles all HTTP requests made while crawling, including:
//! - Building the HTTP client (timeouts, compression, optional proxy)
//! - Per-request identity rotation and pacing
//! - Classifying responses into the outcomes the strategies act on

use crate::config::DiscoveryConfig;
use crate::crawler::politeness::Politeness;
use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Result of fetching one discovery page
#[derive(Debug)]
pub enum PageFetch {
    /// Page body was retrieved
    Page {
        /// Final URL after redirects
        final_url: Url,
        body: String,
    },

    /// HTTP 404; for pagination this marks the end of the listing
    NotFound,

    /// Any other non-success status
    HttpError { status: u16 },

    /// Connection refused, timeout, body read failure
    NetworkError { error: String },
}

impl PageFetch {
    pub fn is_success(&self) -> bool {
        matches!(self, PageFetch::Page { .. })
    }
}

/// Builds the discovery HTTP client
///
/// The identity string is not fixed here; [`PageClient`] sets it per request.
///
/// # Example
///
/// ```no_run
/// use vid_harvest::config::DiscoveryConfig;
/// use vid_harvest::crawler::build_http_client;
///
/// let client = build_http_client(&DiscoveryConfig::default(), None).unwrap();
/// ```
pub fn build_http_client(
    config: &DiscoveryConfig,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    builder.build()
}

/// Fetches a single page with the given identity string
pub async fn fetch_page(client: &Client, url: &Url, user_agent: &str) -> PageFetch {
    let response = match client
        .get(url.as_str())
        .header(USER_AGENT, user_agent)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            let error = if e.is_timeout() {
                "Request timeout".to_string()
            } else if e.is_connect() {
                "Connection refused".to_string()
            } else {
                e.to_string()
            };
            return PageFetch::NetworkError { error };
        }
    };

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return PageFetch::NotFound;
    }
    if !status.is_success() {
        return PageFetch::HttpError {
            status: status.as_u16(),
        };
    }

    let final_url = response.url().clone();
    match response.text().await {
        Ok(body) => PageFetch::Page { final_url, body },
        Err(e) => PageFetch::NetworkError {
            error: e.to_string(),
        },
    }
}

/// HTTP client paired with the pacing state of one discovery run
pub struct PageClient {
    client: Client,
    politeness: Politeness,
}

impl PageClient {
    pub fn new(config: &DiscoveryConfig, proxy: Option<&str>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config, proxy)?,
            politeness: Politeness::from_config(config),
        })
    }

    /// Waits the pacing delay, then fetches `url` under the next identity
    pub async fn fetch(&self, url: &Url) -> PageFetch {
        self.politeness.pause().await;
        let user_agent = self.politeness.user_agent();
        tracing::debug!(url = %url, "Fetching discovery page");
        fetch_page(&self.client, url, user_agent).await
    }
}
