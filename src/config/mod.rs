//! Configuration module for vid-harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use vid_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Default page budget: {}", config.discovery.default_page_budget);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    default_user_agents, Config, DiscoveryConfig, ExtractionConfig, FetchConfig, PipelineConfig,
    RelayConfig, StoreConfig,
};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, parse_config, ENV_DATABASE_PATH,
    ENV_PROXY_URL, ENV_RELAY_ACCESS_KEY, ENV_RELAY_LIBRARY_ID,
};
pub use validation::{relay_credentials, validate, WORKER_LIMIT};
