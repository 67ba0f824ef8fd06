use crate::config::types::{
    Config, DiscoveryConfig, ExtractionConfig, FetchConfig, PipelineConfig, RelayConfig,
};
use crate::ConfigError;
use url::Url;

/// Largest worker pool accepted from configuration
pub const WORKER_LIMIT: usize = 100;

/// Validates the entire configuration
///
/// Relay credentials are not required here: discovery runs without them.
/// See [`relay_credentials`].
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.store.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    if let Some(proxy) = &config.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }
    validate_discovery_config(&config.discovery)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_fetch_config(&config.fetch)?;
    validate_relay_config(&config.relay)?;
    validate_extraction_config(&config.extraction)?;
    Ok(())
}

/// Returns `(access_key, library_id)` or the missing piece as an error
pub fn relay_credentials(config: &RelayConfig) -> Result<(String, String), ConfigError> {
    let access_key = config
        .access_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ConfigError::MissingCredential("relay access key".to_string()))?;
    let library_id = config
        .library_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ConfigError::MissingCredential("relay library id".to_string()))?;
    Ok((access_key.to_string(), library_id.to_string()))
}

fn validate_discovery_config(config: &DiscoveryConfig) -> Result<(), ConfigError> {
    if config.delay_min_ms > config.delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "delay-min-ms ({}) must not exceed delay-max-ms ({})",
            config.delay_min_ms, config.delay_max_ms
        )));
    }

    if config.default_page_budget < 1 {
        return Err(ConfigError::Validation(
            "default-page-budget must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "discovery request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.user_agents.iter().all(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user-agents must contain at least one non-empty entry".to_string(),
        ));
    }

    for path in &config.sitemap_paths {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "sitemap path '{}' must start with '/'",
                path
            )));
        }
    }

    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    for (name, value) in [("workers", config.workers), ("max-workers", config.max_workers)] {
        if value < 1 || value > WORKER_LIMIT {
            return Err(ConfigError::Validation(format!(
                "{} must be between 1 and {}, got {}",
                name, WORKER_LIMIT, value
            )));
        }
    }

    if config.temp_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "temp-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "fetch max-attempts must be >= 1".to_string(),
        ));
    }
    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "fetch timeout-secs must be >= 1".to_string(),
        ));
    }
    if config.yt_dlp_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "yt-dlp-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_relay_config(config: &RelayConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid relay base-url '{}': {}", config.base_url, e))
    })?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "relay base-url must be HTTP(S), got '{}'",
            config.base_url
        )));
    }
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "relay max-attempts must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ConfigError> {
    for pattern in config
        .payload_decode_domains
        .iter()
        .chain(config.browser_domains.iter())
    {
        validate_domain_pattern(pattern)?;
    }

    if config.hard_timeout_secs < 1 || config.page_load_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "browser timeouts must be >= 1 second".to_string(),
        ));
    }

    if config.interaction_window_secs >= config.hard_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "interaction-window-secs ({}) must be below hard-timeout-secs ({})",
            config.interaction_window_secs, config.hard_timeout_secs
        )));
    }

    Ok(())
}

/// Validates a domain pattern (supports a leading `*.`)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain pattern '{}' is empty",
            pattern
        )));
    }

    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) || domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' has a misplaced '.' or '-'",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}
