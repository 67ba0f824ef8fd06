//! vid-harvest: discover, extract and relay media assets
//!
//! This crate crawls third-party sites for asset pages, resolves each page to a
//! direct media reference, fetches it and relays it to a remote hosting library.
//! Progress is tracked per asset in a SQLite store so that crashes and per-asset
//! failures never lose or duplicate work.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for vid-harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Relay failed for {target}: {message}")]
    Relay { target: String, message: String },

    #[error("Insufficient disk space for {url}: {available_mb}MB free, {required_mb}MB required")]
    DiskSpace {
        url: String,
        available_mb: u64,
        required_mb: u64,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] storage::StorageError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    pub fn extraction(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn relay(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Relay {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that must terminate the process rather than a single asset
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
            || matches!(self, Self::Persistence(e) if e.is_connectivity())
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for vid-harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{discover_and_seed, seed_from_file, DiscoveryStats, DiscoveryStrategy};
pub use pipeline::{BatchStats, Pipeline};
pub use state::AssetStatus;
pub use url::{classify, extract_domain, normalize_url, UrlClass};
