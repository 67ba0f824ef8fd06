//! Extraction dispatch
//!
//! Turns an asset page URL into a direct media reference and a title. The
//! strategy is picked by a pure function of the page's domain; only the
//! chosen strategy does any work.

mod browser;
mod delegated;
mod payload;

pub use browser::{
    is_fast_fail, is_media_candidate, rank_candidate, select_best_candidate, BrowserExtractor,
    BrowserLauncher, BrowserSession, ChromiumLauncher, PLAY_SELECTORS, STEALTH_SCRIPTS,
};
pub use delegated::{run_yt_dlp, MediaResolver, ResolvedMedia, YtDlp};
pub use payload::{decode_payload, find_media_source, find_player_payload, PayloadDecoder};

use crate::config::{Config, ExtractionConfig};
use crate::url::matches_any_domain;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Container extensions fetched directly over HTTP
pub const DIRECT_MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov", "m4v"];

/// True when the URL path ends in a direct container extension
pub fn is_direct_media(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.rsplit_once('.')
        .map(|(_, ext)| DIRECT_MEDIA_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Extraction strategy chosen for a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Hand the page to the general-purpose resolver
    Delegated,
    /// Decode the player payload embedded in the page HTML
    PayloadDecode,
    /// Render the page and intercept media requests
    BrowserInterception,
}

/// Picks the extraction strategy for a page URL
///
/// Pure: looks only at the host and the configured domain tables.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use vid_harvest::config::ExtractionConfig;
/// use vid_harvest::extract::{select_strategy, StrategyKind};
///
/// let config = ExtractionConfig {
///     payload_decode_domains: vec!["*.payload.test".to_string()],
///     ..ExtractionConfig::default()
/// };
/// let url = Url::parse("https://www.payload.test/clip/").unwrap();
/// assert_eq!(select_strategy(&url, &config), StrategyKind::PayloadDecode);
/// ```
pub fn select_strategy(url: &Url, config: &ExtractionConfig) -> StrategyKind {
    let Some(host) = url.host_str() else {
        return StrategyKind::Delegated;
    };

    if matches_any_domain(&config.payload_decode_domains, host) {
        StrategyKind::PayloadDecode
    } else if matches_any_domain(&config.browser_domains, host) {
        if config.browser_enabled {
            StrategyKind::BrowserInterception
        } else {
            StrategyKind::Delegated
        }
    } else {
        StrategyKind::Delegated
    }
}

/// Direct media reference resolved from an asset page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMedia {
    pub media_url: String,
    pub title: Option<String>,
}

/// Extraction seam used by the pipeline
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedMedia>;
}

/// Dispatches each page to its strategy
pub struct Extractor {
    config: ExtractionConfig,
    resolver: Arc<dyn MediaResolver>,
    payload: PayloadDecoder,
    browser: BrowserExtractor,
}

impl Extractor {
    /// Builds the extractor with the yt-dlp resolver and the Chromium launcher
    pub fn new(config: &Config) -> Result<Self> {
        let proxy = config.proxy.as_deref();
        let resolver = YtDlp::new(
            &config.fetch.yt_dlp_path,
            proxy,
            Duration::from_secs(config.extraction.hard_timeout_secs),
        );
        let launcher = ChromiumLauncher::new(&config.extraction, proxy);
        let payload = PayloadDecoder::new(config.extraction.request_timeout_secs, proxy)
            .map_err(|e| HarvestError::extraction("payload decoder", e.to_string()))?;

        Ok(Self::with_parts(
            config.extraction.clone(),
            Arc::new(resolver),
            payload,
            Arc::new(launcher),
        ))
    }

    pub fn with_parts(
        config: ExtractionConfig,
        resolver: Arc<dyn MediaResolver>,
        payload: PayloadDecoder,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let browser = BrowserExtractor::new(launcher, &config);
        Self {
            config,
            resolver,
            payload,
            browser,
        }
    }

    async fn extract_delegated(&self, url: &str) -> Result<ExtractedMedia> {
        let resolved = self.resolver.resolve(url).await?;
        Ok(ExtractedMedia {
            media_url: resolved.url,
            title: resolved.title,
        })
    }
}

#[async_trait]
impl MediaExtractor for Extractor {
    async fn extract(&self, url: &str) -> Result<ExtractedMedia> {
        let parsed =
            Url::parse(url).map_err(|e| HarvestError::extraction(url, format!("Invalid URL: {}", e)))?;
        let strategy = select_strategy(&parsed, &self.config);

        tracing::debug!(url = %url, ?strategy, "Dispatching extraction");

        let media = match strategy {
            StrategyKind::Delegated => self.extract_delegated(url).await?,
            StrategyKind::PayloadDecode => self.payload.extract(url).await?,
            StrategyKind::BrowserInterception => self.browser.extract(url).await?,
        };

        tracing::info!(
            "Extracted {} ({})",
            media.media_url,
            media.title.as_deref().unwrap_or("untitled")
        );
        Ok(media)
    }
}
