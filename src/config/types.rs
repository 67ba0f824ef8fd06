use serde::Deserialize;

/// Main configuration structure for vid-harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Optional proxy for every outbound request (discovery, extraction, fetch, browser)
    #[serde(default)]
    pub proxy: Option<String>,

    pub store: StoreConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// Asset store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Discovery crawler configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Lower bound of the randomized delay between requests (milliseconds)
    #[serde(rename = "delay-min-ms")]
    pub delay_min_ms: u64,

    /// Upper bound of the randomized delay between requests (milliseconds)
    #[serde(rename = "delay-max-ms")]
    pub delay_max_ms: u64,

    /// Page budget used when the caller does not give one
    #[serde(rename = "default-page-budget")]
    pub default_page_budget: u32,

    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Client identity strings rotated per request
    #[serde(rename = "user-agents")]
    pub user_agents: Vec<String>,

    /// Well-known sitemap locations tried in order
    #[serde(rename = "sitemap-paths")]
    pub sitemap_paths: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            delay_min_ms: 2000,
            delay_max_ms: 5000,
            default_page_budget: 5,
            request_timeout_secs: 30,
            user_agents: default_user_agents(),
            sitemap_paths: vec![
                "/sitemap.xml".to_string(),
                "/sitemap_index.xml".to_string(),
                "/post-sitemap.xml".to_string(),
            ],
        }
    }
}

/// Desktop browser identities used for rotation
pub fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Pipeline orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Requested worker count
    pub workers: usize,

    /// Hard cap on workers; each may hold a browser instance in memory
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Free space floor for admitting an asset (megabytes)
    #[serde(rename = "min-free-disk-mb")]
    pub min_free_disk_mb: u64,

    /// Wait before the single admission re-check (seconds)
    #[serde(rename = "disk-recheck-secs")]
    pub disk_recheck_secs: u64,

    /// Directory holding local artifacts between fetch and relay
    #[serde(rename = "temp-dir")]
    pub temp_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_workers: 2,
            min_free_disk_mb: 5 * 1024,
            disk_recheck_secs: 10,
            temp_dir: "./temp_storage".to_string(),
        }
    }
}

/// Fetch collaborator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Attempts per fetch, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Upper bound for a whole fetch (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// External resolver/downloader used for non-direct media
    #[serde(rename = "yt-dlp-path")]
    pub yt_dlp_path: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_secs: 1800,
            yt_dlp_path: "yt-dlp".to_string(),
        }
    }
}

/// Relay (hosting library) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Target collection; falls back to VID_HARVEST_RELAY_LIBRARY_ID
    #[serde(rename = "library-id")]
    pub library_id: Option<String>,

    /// Access credential; falls back to VID_HARVEST_RELAY_ACCESS_KEY
    #[serde(rename = "access-key")]
    pub access_key: Option<String>,

    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Upper bound for one register or transfer call (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://video.bunnycdn.com/library".to_string(),
            library_id: None,
            access_key: None,
            max_attempts: 3,
            timeout_secs: 3600,
        }
    }
}

/// Extraction dispatch configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Sites embedding an encoded player payload (e.g. "*.example.com")
    #[serde(rename = "payload-decode-domains")]
    pub payload_decode_domains: Vec<String>,

    /// Sites that need a rendered page and network interception
    #[serde(rename = "browser-domains")]
    pub browser_domains: Vec<String>,

    /// When false, browser domains fall back to delegated extraction
    #[serde(rename = "browser-enabled")]
    pub browser_enabled: bool,

    #[serde(rename = "browser-headless")]
    pub browser_headless: bool,

    #[serde(rename = "page-load-timeout-secs")]
    pub page_load_timeout_secs: u64,

    /// How long to keep clicking play controls (seconds)
    #[serde(rename = "interaction-window-secs")]
    pub interaction_window_secs: u64,

    /// Ceiling for one browser extraction, launch to teardown (seconds)
    #[serde(rename = "hard-timeout-secs")]
    pub hard_timeout_secs: u64,

    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    #[serde(rename = "chrome-args")]
    pub chrome_args: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            payload_decode_domains: Vec::new(),
            browser_domains: Vec::new(),
            browser_enabled: true,
            browser_headless: true,
            page_load_timeout_secs: 30,
            interaction_window_secs: 15,
            hard_timeout_secs: 60,
            request_timeout_secs: 15,
            chrome_args: Vec::new(),
        }
    }
}
