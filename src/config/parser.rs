use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable overriding `store.database-path`
pub const ENV_DATABASE_PATH: &str = "VID_HARVEST_DATABASE_PATH";
/// Environment variable supplying `relay.access-key`
pub const ENV_RELAY_ACCESS_KEY: &str = "VID_HARVEST_RELAY_ACCESS_KEY";
/// Environment variable supplying `relay.library-id`
pub const ENV_RELAY_LIBRARY_ID: &str = "VID_HARVEST_RELAY_LIBRARY_ID";
/// Environment variable supplying `proxy`
pub const ENV_PROXY_URL: &str = "VID_HARVEST_PROXY_URL";

/// Loads and parses a configuration file from the given path
///
/// Credentials and the proxy missing from the file are filled in from the
/// environment before validation.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use vid_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Workers: {}", config.pipeline.workers);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parses configuration text, resolving overrides through `lookup`
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)?;
    apply_env_overrides(&mut config, lookup);
    validate(&config)?;
    Ok(config)
}

/// Fills unset secrets from the environment; the database path env var always wins
fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(path) = non_empty(ENV_DATABASE_PATH) {
        config.store.database_path = path;
    }
    if config.relay.access_key.is_none() {
        config.relay.access_key = non_empty(ENV_RELAY_ACCESS_KEY);
    }
    if config.relay.library_id.is_none() {
        config.relay.library_id = non_empty(ENV_RELAY_LIBRARY_ID);
    }
    if config.proxy.is_none() {
        config.proxy = non_empty(ENV_PROXY_URL);
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Recorded with every processing batch so a batch can be traced back to
/// the settings it ran with.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
